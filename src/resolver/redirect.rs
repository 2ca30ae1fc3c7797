//! Redirect-chain DOI resolver.
//!
//! The [`RedirectResolver`] issues a header-only request to the resolution
//! endpoint and succeeds only when the request was redirected; the final URL
//! of the redirect chain is the landing page. No body is ever downloaded.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::redirect::Policy;
use tracing::debug;
use url::Url;

use super::{DoiResolver, RESOLVER_USER_AGENT, ResolveError, encode_identifier};

/// Default identifier-resolution endpoint.
const DEFAULT_BASE_URL: &str = "https://doi.org";

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves identifiers by following the resolution endpoint's redirects.
pub struct RedirectResolver {
    client: Client,
    base_url: String,
}

impl RedirectResolver {
    /// Creates a resolver against the canonical resolution endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Client`] if HTTP client construction fails.
    pub fn new() -> Result<Self, ResolveError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a resolver with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Client`] if HTTP client construction fails.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .redirect(Policy::limited(MAX_REDIRECTS))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .user_agent(RESOLVER_USER_AGENT)
            .build()
            .map_err(|e| ResolveError::client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl std::fmt::Debug for RedirectResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectResolver")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DoiResolver for RedirectResolver {
    fn name(&self) -> &'static str {
        "redirect"
    }

    #[tracing::instrument(skip(self), fields(resolver = "redirect", identifier = %identifier))]
    async fn resolve(&self, identifier: &str) -> Result<Url, ResolveError> {
        let request_url = format!("{}/{}", self.base_url, encode_identifier(identifier));
        let origin = Url::parse(&request_url)
            .map_err(|_| ResolveError::invalid_location(identifier, &request_url))?;

        // HEAD keeps the exchange header-only; the redirect chain is all
        // this resolver needs.
        let response = self
            .client
            .head(origin.clone())
            .send()
            .await
            .map_err(|e| ResolveError::request(identifier, e.to_string()))?;

        let final_url = response.url().clone();
        if final_url == origin {
            return Err(ResolveError::not_redirected(identifier));
        }

        debug!(location = %final_url, "DOI resolved");
        Ok(final_url)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_resolve_follows_redirect_chain_to_final_url() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/10.1000/demo"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/hop", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/hop"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/landing", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/landing"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let resolver = RedirectResolver::with_base_url(mock_server.uri()).unwrap();
        let location = resolver.resolve("10.1000/demo").await.unwrap();
        assert_eq!(location.as_str(), format!("{}/landing", mock_server.uri()));
    }

    #[tokio::test]
    async fn test_resolve_without_redirect_fails() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/10.9999/unknown"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let resolver = RedirectResolver::with_base_url(mock_server.uri()).unwrap();
        let result = resolver.resolve("10.9999/unknown").await;
        assert!(matches!(result, Err(ResolveError::NotRedirected { .. })));
    }

    #[tokio::test]
    async fn test_resolve_404_without_redirect_fails() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/10.9999/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let resolver = RedirectResolver::with_base_url(mock_server.uri()).unwrap();
        let result = resolver.resolve("10.9999/missing").await;
        assert!(matches!(result, Err(ResolveError::NotRedirected { .. })));
    }

    #[tokio::test]
    async fn test_resolve_uses_head_not_get() {
        let mock_server = MockServer::start().await;

        // Only HEAD is mounted; a GET would fall through to a 404 response
        // with no redirect and fail the assertion below.
        Mock::given(method("HEAD"))
            .and(path("/10.1000/headonly"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/done", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/done"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let resolver = RedirectResolver::with_base_url(mock_server.uri()).unwrap();
        let location = resolver.resolve("10.1000/headonly").await.unwrap();
        assert!(location.as_str().ends_with("/done"));
    }

    #[tokio::test]
    async fn test_resolver_name() {
        let resolver = RedirectResolver::new().unwrap();
        assert_eq!(resolver.name(), "redirect");
    }
}
