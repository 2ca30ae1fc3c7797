//! HTTP entry point: expose the retrieval pipeline over a small REST surface.
//!
//! One long-lived pipeline serves every request; operations within a
//! session are sequential, so the pipeline sits behind an async mutex and
//! requests queue on it.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use doifetch_core::{Pipeline, PipelineError, ServerConfig, filename, is_doi};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};
use url::Url;

/// Errors a request handler can produce.
///
/// Core failures map to HTTP 500 with the error's message as the body; a
/// malformed identifier is the client's mistake and maps to 400.
#[derive(Debug, Error)]
enum ServerError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("'{doi}' does not look like a DOI (expected 10.NNNN/suffix)")]
    InvalidIdentifier { doi: String },

    #[error("no PDF links found for '{doi}'")]
    NoLinks { doi: String },

    #[error("paginate index {index} out of range ({available} candidate(s) found)")]
    OutOfRange { index: usize, available: usize },
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        error!(error = %self, "request failed");
        let status = match self {
            ServerError::InvalidIdentifier { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

struct AppState {
    pipeline: Mutex<Pipeline>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env();

    let mut pipeline = Pipeline::builder().backend(config.backend).build()?;
    pipeline
        .init(Some(&config.proxy))
        .await
        .context("pipeline initialization failed")?;

    let state = Arc::new(AppState {
        pipeline: Mutex::new(pipeline),
    });

    let app = axum::Router::new()
        .route("/", get(usage))
        .route("/{prefix}/{suffix}", get(fetch_first))
        .route("/{prefix}/{suffix}/list", get(list_candidates))
        .route("/{prefix}/{suffix}/{index}", get(fetch_indexed))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    info!(host = %config.host, port = config.port, backend = %config.backend, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    info!("shutting down");
    state.pipeline.lock().await.close().await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn usage() -> String {
    [
        "Usage:",
        "  GET /:doi            download the first PDF candidate",
        "  GET /:doi/list       list candidate ordinals and URLs as JSON",
        "  GET /:doi/:index     download the index-th candidate (0-based)",
        "",
        "Example:",
        "  GET /10.48550/arXiv.2302.13971",
        "  GET /10.48550/arXiv.2302.13971/list",
        "  GET /10.48550/arXiv.2302.13971/1",
    ]
    .join("\n")
}

async fn list_candidates(
    Path((prefix, suffix)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<usize, String>>, ServerError> {
    let doi = format!("{prefix}/{suffix}");
    let (_, links) = resolve_and_discover(&state, &doi).await?;
    Ok(Json(index_candidates(&links)))
}

async fn fetch_first(
    Path((prefix, suffix)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ServerError> {
    fetch(state, format!("{prefix}/{suffix}"), 0).await
}

async fn fetch_indexed(
    Path((prefix, suffix, index)): Path<(String, String, usize)>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ServerError> {
    fetch(state, format!("{prefix}/{suffix}"), index).await
}

async fn fetch(state: Arc<AppState>, doi: String, index: usize) -> Result<Response, ServerError> {
    let (location, links) = resolve_and_discover(&state, &doi).await?;

    let Some(candidate) = links.get(index) else {
        return Err(ServerError::OutOfRange {
            index,
            available: links.len(),
        });
    };

    let pipeline = state.pipeline.lock().await;
    let bytes = pipeline.download_pdf(candidate, &location).await?;
    drop(pipeline);

    let disposition = format!(
        "inline; filename=\"{}\"",
        filename::default_output_name(&doi)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn resolve_and_discover(
    state: &AppState,
    doi: &str,
) -> Result<(Url, Vec<Url>), ServerError> {
    if !is_doi(doi) {
        return Err(ServerError::InvalidIdentifier {
            doi: doi.to_string(),
        });
    }
    let pipeline = state.pipeline.lock().await;
    let location = pipeline.resolve_doi_link(doi).await?;
    let links = pipeline.pdf_links(&location).await?;
    if links.is_empty() {
        return Err(ServerError::NoLinks {
            doi: doi.to_string(),
        });
    }
    Ok((location, links))
}

/// Maps candidates to their selection ordinals for client-side
/// disambiguation.
fn index_candidates(links: &[Url]) -> BTreeMap<usize, String> {
    links
        .iter()
        .enumerate()
        .map(|(ordinal, link)| (ordinal, link.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_candidates_preserves_order() {
        let links = vec![
            Url::parse("https://pub.example/a.pdf").unwrap(),
            Url::parse("https://pub.example/b.pdf").unwrap(),
        ];
        let indexed = index_candidates(&links);
        assert_eq!(indexed[&0], "https://pub.example/a.pdf");
        assert_eq!(indexed[&1], "https://pub.example/b.pdf");
    }

    #[test]
    fn test_invalid_identifier_is_client_error() {
        let response = ServerError::InvalidIdentifier {
            doi: "garbage".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_out_of_range_is_server_error() {
        let response = ServerError::OutOfRange {
            index: 3,
            available: 1,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_out_of_range_error_names_bounds() {
        let msg = ServerError::OutOfRange {
            index: 3,
            available: 1,
        }
        .to_string();
        assert!(msg.contains('3'), "got: {msg}");
        assert!(msg.contains("out of range"), "got: {msg}");
    }
}
