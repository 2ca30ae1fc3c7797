//! DOI resolution strategies.
//!
//! A DOI is an opaque identifier; resolution turns it into the canonical
//! landing-page URL for the document. Two interchangeable strategies exist:
//!
//! - [`RedirectResolver`] - Primary. Issues a header-only request to the
//!   resolution endpoint and takes the final URL of the redirect chain.
//! - [`HandleRegistryResolver`] - Named fallback. Queries the handle
//!   registry API and takes the first `URL`-typed value.
//!
//! Either strategy is deterministic for a given identifier at a given time,
//! and nothing downstream depends on which one produced the location.

mod error;
mod handle;
mod redirect;

pub use error::ResolveError;
pub use handle::HandleRegistryResolver;
pub use redirect::RedirectResolver;

use std::str::FromStr;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

/// Shared user agent for resolver HTTP traffic.
pub(crate) const RESOLVER_USER_AGENT: &str =
    concat!("doifetch/", env!("CARGO_PKG_VERSION"));

/// Bare DOI shape: `10.XXXX/suffix`, with optional nested registrants.
#[allow(clippy::expect_used)]
static DOI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^10\.\d{4,9}(?:\.\d+)*/\S+$").expect("DOI regex is valid") // Static pattern, safe to panic
});

/// Returns true if `input` has the shape of a DOI.
#[must_use]
pub fn is_doi(input: &str) -> bool {
    DOI_PATTERN.is_match(input.trim())
}

/// Percent-encodes an identifier for embedding in a URL path, keeping the
/// prefix/suffix separator intact so registry routes still match.
pub(crate) fn encode_identifier(identifier: &str) -> String {
    urlencoding::encode(identifier).replace("%2F", "/")
}

/// Trait both resolution strategies implement.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Box<dyn DoiResolver>`, so strategies can be swapped without touching
/// downstream components.
#[async_trait]
pub trait DoiResolver: Send + Sync {
    /// The strategy's name (e.g., "redirect", "handle-registry").
    fn name(&self) -> &str;

    /// Resolves `identifier` to its canonical landing-page URL.
    ///
    /// Locations are never cached; each call re-resolves.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the identifier does not resolve.
    async fn resolve(&self, identifier: &str) -> Result<Url, ResolveError>;
}

/// Which resolution strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverStrategy {
    /// Follow the resolution endpoint's redirect chain.
    #[default]
    Redirect,
    /// Query the handle registry API.
    HandleRegistry,
}

impl FromStr for ResolverStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redirect" => Ok(Self::Redirect),
            "handle-registry" | "handle" => Ok(Self::HandleRegistry),
            other => Err(format!(
                "unknown resolver strategy '{other}' (expected redirect or handle-registry)"
            )),
        }
    }
}

/// Builds the resolver for `strategy`.
///
/// # Errors
///
/// Returns [`ResolveError`] if HTTP client construction fails.
pub fn build_resolver(strategy: ResolverStrategy) -> Result<Box<dyn DoiResolver>, ResolveError> {
    Ok(match strategy {
        ResolverStrategy::Redirect => Box::new(RedirectResolver::new()?),
        ResolverStrategy::HandleRegistry => Box::new(HandleRegistryResolver::new()?),
    })
}
