//! Document byte retrieval through the authenticated page context.
//!
//! The fetch runs inside the landing page rather than from the host so it
//! carries the page's ambient credentials (cookies, referer, any access
//! established by prior navigation). The page/host bridge only carries
//! JSON-serializable values, so the response body crosses as a base64
//! string produced by the page's native binary-to-text facility and is
//! decoded back to raw bytes on the host.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::backend::{AutomationBackend, BackendError};

/// Fetches a candidate URL from page context with credentials included.
/// Returns the body as base64 when the declared content type is acceptable,
/// `null` otherwise. `FileReader.readAsDataURL` is the fastest in-page path
/// for large binary-to-base64 conversion; the data-URI prefix is stripped
/// before the value crosses the bridge.
const FETCH_AS_BASE64_SCRIPT: &str = r#"async (downloadUrl, acceptedTypes) => {
  const resp = await fetch(downloadUrl, { credentials: "include" });
  const declared = (resp.headers.get("content-type") || "").split(";")[0].trim().toLowerCase();
  if (!acceptedTypes.includes(declared)) {
    return null;
  }
  const blob = await resp.blob();
  const dataUrl = await new Promise((resolve) => {
    const reader = new FileReader();
    reader.onload = () => resolve(reader.result);
    reader.readAsDataURL(blob);
  });
  return dataUrl.substring(dataUrl.indexOf(",") + 1);
}"#;

/// Errors that can occur during content retrieval.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// The automation backend failed to render or evaluate.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The candidate did not yield a document-typed response; it was likely
    /// a disambiguation or gateway page. Callers may retry with a different
    /// candidate from the already-discovered set.
    #[error("document could not be retrieved from {url}: response was not a document")]
    NotADocument {
        /// The candidate that failed.
        url: String,
    },

    /// The base64 payload from the page did not decode.
    #[error("document payload failed to decode: {source}")]
    Decode {
        /// The underlying decode error.
        #[source]
        source: base64::DecodeError,
    },

    /// The bridge carried something other than a string or the sentinel.
    #[error("retrieval payload malformed: {reason}")]
    Malformed {
        /// What was wrong with the payload.
        reason: String,
    },
}

/// Retrieves document bytes for a chosen candidate link.
#[derive(Debug, Clone)]
pub struct ContentRetriever {
    accepted_types: Vec<String>,
}

impl ContentRetriever {
    /// Creates a retriever accepting `application/pdf` responses.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accepted_types: vec!["application/pdf".to_string()],
        }
    }

    /// Also accepts `application/octet-stream` responses, for servers that
    /// mislabel document downloads.
    #[must_use]
    pub fn accept_octet_stream(mut self) -> Self {
        self.accepted_types
            .push("application/octet-stream".to_string());
        self
    }

    /// Creates a retriever with a custom acceptable content-type set.
    #[must_use]
    pub fn with_accepted_types(accepted_types: Vec<String>) -> Self {
        Self { accepted_types }
    }

    /// Fetches `candidate` from within `location`'s page context and
    /// returns the raw document bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RetrieveError::NotADocument`] when the response's declared
    /// content type is not acceptable, [`RetrieveError::Decode`] when the
    /// bridge payload is not valid base64, or the backend's error when
    /// rendering fails.
    #[tracing::instrument(skip(self, backend), fields(location = %location, candidate = %candidate))]
    pub async fn retrieve(
        &self,
        backend: &dyn AutomationBackend,
        location: &Url,
        candidate: &Url,
    ) -> Result<Vec<u8>, RetrieveError> {
        let payload = backend
            .goto_and_evaluate(
                location.as_str(),
                FETCH_AS_BASE64_SCRIPT,
                &[json!(candidate.as_str()), json!(self.accepted_types)],
            )
            .await?;

        let encoded = match payload {
            Value::Null => {
                return Err(RetrieveError::NotADocument {
                    url: candidate.to_string(),
                });
            }
            Value::String(encoded) => encoded,
            other => {
                return Err(RetrieveError::Malformed {
                    reason: format!("expected base64 string or null, got {other}"),
                });
            }
        };

        // The in-page data-URI facility emits the standard alphabet with
        // padding; a mismatched engine here would silently corrupt bytes.
        let bytes = BASE64_STANDARD
            .decode(encoded)
            .map_err(|source| RetrieveError::Decode { source })?;

        debug!(bytes = bytes.len(), "document retrieved");
        Ok(bytes)
    }
}

impl Default for ContentRetriever {
    fn default() -> Self {
        Self::new()
    }
}
