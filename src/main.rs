//! CLI entry point for the doifetch tool.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use doifetch_core::{Pipeline, filename, is_doi};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    if !is_doi(&args.doi) {
        bail!("'{}' does not look like a DOI (expected 10.NNNN/suffix)", args.doi);
    }

    let mut pipeline = Pipeline::builder().backend(args.backend).build()?;

    // Teardown must run whether the session succeeded or not.
    let outcome = run(&mut pipeline, &args).await;
    let closed = pipeline.close().await;

    if let Err(close_error) = &closed {
        tracing::warn!(error = %close_error, "session teardown failed");
    }
    let saved_path = outcome?;
    closed.context("session teardown failed")?;

    info!(path = %saved_path.display(), "saved");
    Ok(())
}

/// Runs one resolve-discover-download session and writes the result.
async fn run(pipeline: &mut Pipeline, args: &Args) -> Result<PathBuf> {
    pipeline.init(Some(&args.proxy)).await?;

    let location = pipeline.resolve_doi_link(&args.doi).await?;
    info!(location = %location, "DOI resolved");

    let links = pipeline.pdf_links(&location).await?;
    if links.is_empty() {
        bail!("no PDF links found on {location}");
    }

    for (ordinal, link) in links.iter().enumerate() {
        info!(ordinal, link = %link, "candidate");
    }

    let index = args.index.unwrap_or(0);
    let Some(candidate) = links.get(index) else {
        bail!(
            "candidate index {index} is out of range ({} candidate(s) found)",
            links.len()
        );
    };
    if links.len() > 1 && args.index.is_none() {
        info!(
            chosen = %candidate,
            "multiple candidates found; downloading the first (rerun with --index N to pick another)"
        );
    }

    info!(candidate = %candidate, "downloading");
    let bytes = pipeline.download_pdf(candidate, &location).await?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(filename::default_output_name(&args.doi)));
    tokio::fs::write(&output, &bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    Ok(output)
}
