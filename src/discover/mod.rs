//! Candidate document link discovery on rendered landing pages.
//!
//! Landing pages place document links inconsistently: in anchor `href`s, in
//! `data-*` attributes, in `content` attributes of meta tags. The primary
//! strategy therefore walks every attribute of every element instead of
//! only anchors; a narrower fallback reads only the page's
//! `citation_pdf_url` metadata for publishers that declare it. Both feed
//! the same host-side post-processing into an ordered, deduplicated set of
//! absolute URLs.

use std::collections::BTreeSet;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use crate::backend::{AutomationBackend, BackendError};

/// Walks the rendered DOM and collects attribute values that contain the
/// document marker and a path separator (rejecting bare filenames and query
/// flags). Runs in page context; returns an array of raw attribute values.
const SCAN_ATTRIBUTES_SCRIPT: &str = r#"(marker) => {
  const hits = [];
  for (const el of document.querySelectorAll("*")) {
    for (const name of el.getAttributeNames()) {
      const value = el.getAttribute(name);
      if (value && value.includes(marker) && value.includes("/")) {
        hits.push(value);
      }
    }
  }
  return hits;
}"#;

/// Reads `citation_pdf_url` metadata entries. Higher precision, lower
/// recall than the attribute scan: only publishers that declare citation
/// metadata are covered.
const CITATION_META_SCRIPT: &str = r#"() => {
  const hits = [];
  const selector = 'meta[name="citation_pdf_url"], meta[property="citation_pdf_url"]';
  for (const el of document.querySelectorAll(selector)) {
    const value = el.getAttribute("content");
    if (value) {
      hits.push(value);
    }
  }
  return hits;
}"#;

/// How candidate links are extracted from the rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryStrategy {
    /// Primary: scan every attribute of every element.
    #[default]
    AttributeScan,
    /// Fallback: read only declared `citation_pdf_url` metadata.
    CitationMeta,
}

/// Errors that can occur during link discovery.
///
/// Zero candidates is not an error: discovery returns an empty sequence and
/// callers decide whether that is fatal.
#[derive(Debug, Error)]
pub enum DiscoverError {
    /// The automation backend failed to render or evaluate.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The in-page scan returned something other than a string array.
    #[error("scan result malformed: {reason}")]
    Malformed {
        /// What was wrong with the payload.
        reason: String,
    },
}

/// Discovers candidate document links on a landing page.
#[derive(Debug, Clone)]
pub struct LinkDiscoverer {
    marker: String,
    strategy: DiscoveryStrategy,
}

impl LinkDiscoverer {
    /// Creates a discoverer using the attribute scan and the default
    /// document marker (`pdf`).
    #[must_use]
    pub fn new() -> Self {
        Self::with_marker("pdf")
    }

    /// Creates a discoverer matching a custom document marker.
    #[must_use]
    pub fn with_marker(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            strategy: DiscoveryStrategy::default(),
        }
    }

    /// Switches the extraction strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: DiscoveryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Renders `location` and extracts candidate links.
    ///
    /// Raw values are resolved against the landing-page URL, deduplicated by
    /// exact absolute form, and sorted ascending so repeated runs over the
    /// same page content produce identical output.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoverError`] when rendering fails or the bridge payload
    /// is malformed.
    #[tracing::instrument(skip(self, backend), fields(location = %location))]
    pub async fn discover(
        &self,
        backend: &dyn AutomationBackend,
        location: &Url,
    ) -> Result<Vec<Url>, DiscoverError> {
        let (script, args) = match self.strategy {
            DiscoveryStrategy::AttributeScan => {
                (SCAN_ATTRIBUTES_SCRIPT, vec![json!(self.marker)])
            }
            DiscoveryStrategy::CitationMeta => (CITATION_META_SCRIPT, Vec::new()),
        };
        let raw = backend
            .goto_and_evaluate(location.as_str(), script, &args)
            .await?;

        let hits: Vec<String> = match raw {
            Value::Null => Vec::new(),
            value => serde_json::from_value(value).map_err(|e| DiscoverError::Malformed {
                reason: e.to_string(),
            })?,
        };

        let mut ordered = BTreeSet::new();
        for hit in &hits {
            match absolutize(hit, location) {
                Some(absolute) => {
                    ordered.insert(absolute);
                }
                None => trace!(value = %hit, "dropping unresolvable attribute value"),
            }
        }

        let links: Vec<Url> = ordered
            .into_iter()
            .filter_map(|candidate| Url::parse(&candidate).ok())
            .collect();

        debug!(count = links.len(), "landing page scan complete");
        Ok(links)
    }
}

impl Default for LinkDiscoverer {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a possibly relative attribute value against the landing page.
///
/// Absolute values pass through, protocol-relative values are normalized to
/// `https:`, everything else is joined against the base URL.
fn absolutize(value: &str, base_url: &Url) -> Option<String> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base_url.join(value).ok().map(|url| url.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Backend fake that records the evaluate call and returns a canned
    /// payload.
    struct FakeBackend {
        payload: Value,
        seen: Mutex<Vec<(String, String, Vec<Value>)>>,
    }

    impl FakeBackend {
        fn returning(payload: Value) -> Self {
            Self {
                payload,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AutomationBackend for FakeBackend {
        async fn init(&mut self, _proxy: Option<&str>) -> Result<(), BackendError> {
            Ok(())
        }

        async fn goto_and_evaluate(
            &self,
            url: &str,
            script: &str,
            args: &[Value],
        ) -> Result<Value, BackendError> {
            self.seen
                .lock()
                .unwrap()
                .push((url.to_string(), script.to_string(), args.to_vec()));
            Ok(self.payload.clone())
        }

        async fn close(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn landing() -> Url {
        Url::parse("https://pub.example/abc").unwrap()
    }

    #[tokio::test]
    async fn test_discover_deduplicates_relative_and_absolute_forms() {
        let backend = FakeBackend::returning(json!([
            "files/a.pdf",
            "https://pub.example/files/a.pdf",
        ]));
        let links = LinkDiscoverer::new()
            .discover(&backend, &landing())
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://pub.example/files/a.pdf");
    }

    #[tokio::test]
    async fn test_discover_resolves_relative_against_landing_page() {
        let backend = FakeBackend::returning(json!(["files/x.pdf"]));
        let links = LinkDiscoverer::new()
            .discover(&backend, &landing())
            .await
            .unwrap();
        assert_eq!(links[0].as_str(), "https://pub.example/files/x.pdf");
    }

    #[tokio::test]
    async fn test_discover_normalizes_protocol_relative() {
        let backend = FakeBackend::returning(json!(["//cdn.example/p/doc.pdf"]));
        let links = LinkDiscoverer::new()
            .discover(&backend, &landing())
            .await
            .unwrap();
        assert_eq!(links[0].as_str(), "https://cdn.example/p/doc.pdf");
    }

    #[tokio::test]
    async fn test_discover_output_sorted_and_unique() {
        let backend = FakeBackend::returning(json!([
            "https://pub.example/z.pdf/view",
            "https://pub.example/a.pdf",
            "https://pub.example/z.pdf/view",
            "https://pub.example/m.pdf",
        ]));
        let links = LinkDiscoverer::new()
            .discover(&backend, &landing())
            .await
            .unwrap();
        let rendered: Vec<&str> = links.iter().map(Url::as_str).collect();
        assert_eq!(
            rendered,
            vec![
                "https://pub.example/a.pdf",
                "https://pub.example/m.pdf",
                "https://pub.example/z.pdf/view",
            ]
        );
    }

    #[tokio::test]
    async fn test_discover_is_deterministic_across_runs() {
        let payload = json!(["b/doc.pdf", "a/doc.pdf", "https://pub.example/b/doc.pdf"]);
        let backend = FakeBackend::returning(payload.clone());
        let discoverer = LinkDiscoverer::new();
        let first = discoverer.discover(&backend, &landing()).await.unwrap();
        let second = discoverer.discover(&backend, &landing()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_discover_empty_page_returns_empty_not_error() {
        let backend = FakeBackend::returning(json!([]));
        let links = LinkDiscoverer::new()
            .discover(&backend, &landing())
            .await
            .unwrap();
        assert!(links.is_empty());
    }

    #[tokio::test]
    async fn test_discover_null_payload_treated_as_empty() {
        let backend = FakeBackend::returning(Value::Null);
        let links = LinkDiscoverer::new()
            .discover(&backend, &landing())
            .await
            .unwrap();
        assert!(links.is_empty());
    }

    #[tokio::test]
    async fn test_discover_non_array_payload_is_malformed() {
        let backend = FakeBackend::returning(json!({"unexpected": true}));
        let result = LinkDiscoverer::new().discover(&backend, &landing()).await;
        assert!(matches!(result, Err(DiscoverError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_discover_passes_marker_to_script() {
        let backend = FakeBackend::returning(json!([]));
        LinkDiscoverer::with_marker("epub")
            .discover(&backend, &landing())
            .await
            .unwrap();
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].2, vec![json!("epub")]);
    }

    #[tokio::test]
    async fn test_citation_meta_strategy_uses_metadata_script() {
        let backend = FakeBackend::returning(json!(["pdfs/a.pdf"]));
        let links = LinkDiscoverer::new()
            .with_strategy(DiscoveryStrategy::CitationMeta)
            .discover(&backend, &landing())
            .await
            .unwrap();
        assert_eq!(links[0].as_str(), "https://pub.example/pdfs/a.pdf");

        let seen = backend.seen.lock().unwrap();
        assert!(seen[0].1.contains("citation_pdf_url"));
        assert!(seen[0].2.is_empty(), "metadata script takes no arguments");
    }

    #[test]
    fn test_default_strategy_is_attribute_scan() {
        assert_eq!(
            DiscoveryStrategy::default(),
            DiscoveryStrategy::AttributeScan
        );
    }

    #[test]
    fn test_absolutize_absolute_unchanged() {
        let base = landing();
        assert_eq!(
            absolutize("https://other.example/d.pdf", &base),
            Some("https://other.example/d.pdf".to_string())
        );
    }

    #[test]
    fn test_scan_script_requires_marker_and_separator() {
        assert!(SCAN_ATTRIBUTES_SCRIPT.contains("includes(marker)"));
        assert!(SCAN_ATTRIBUTES_SCRIPT.contains(r#"includes("/")"#));
    }
}
