//! Handle-registry DOI resolver.
//!
//! The [`HandleRegistryResolver`] queries the registry's REST API instead of
//! following redirects: it fetches the handle record for the identifier,
//! picks the first value entry whose declared type is `URL`, and upgrades
//! the location to secure transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{DoiResolver, RESOLVER_USER_AGENT, ResolveError, encode_identifier};

/// Default handle registry API endpoint.
const DEFAULT_BASE_URL: &str = "https://doi.org";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ==================== Handle API Response Types ====================

/// Top-level handle record response.
#[derive(Debug, Deserialize)]
pub(crate) struct HandleResponse {
    #[serde(rename = "responseCode")]
    #[allow(dead_code)] // Deserialized for completeness; the values list is authoritative
    pub response_code: i64,
    #[serde(default)]
    pub values: Vec<HandleValue>,
}

/// One value entry of a handle record.
#[derive(Debug, Deserialize)]
pub(crate) struct HandleValue {
    #[serde(rename = "type")]
    pub value_type: String,
    pub data: Option<HandleData>,
}

/// The data payload of a handle value.
#[derive(Debug, Deserialize)]
pub(crate) struct HandleData {
    pub value: serde_json::Value,
}

// ==================== HandleRegistryResolver ====================

/// Resolves identifiers through the handle registry API.
pub struct HandleRegistryResolver {
    client: Client,
    base_url: String,
}

impl HandleRegistryResolver {
    /// Creates a resolver against the canonical registry endpoint.
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

impl std::fmt::Debug for HandleRegistryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRegistryResolver")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DoiResolver for HandleRegistryResolver {
    fn name(&self) -> &'static str {
        "handle-registry"
    }

    #[tracing::instrument(skip(self), fields(resolver = "handle-registry", identifier = %identifier))]
    async fn resolve(&self, identifier: &str) -> Result<Url, ResolveError> {
        let api_url = format!(
            "{}/api/handles/{}",
            self.base_url,
            encode_identifier(identifier)
        );

        let response = self
            .client
            .get(&api_url)
            .send()
            .await
            .map_err(|e| ResolveError::request(identifier, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::registry_status(identifier, status.as_u16()));
        }

        let record: HandleResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::request(identifier, e.to_string()))?;

        let raw = first_url_value(&record)
            .ok_or_else(|| ResolveError::no_url_value(identifier))?;

        let mut location = Url::parse(raw)
            .map_err(|_| ResolveError::invalid_location(identifier, raw))?;
        if location.scheme() == "http" {
            // Registry records predating the https migration still carry
            // plain-http locations.
            let _ = location.set_scheme("https");
        }

        debug!(location = %location, "DOI resolved via handle registry");
        Ok(location)
    }
}

/// Returns the first value entry declared as a URL.
fn first_url_value(record: &HandleResponse) -> Option<&str> {
    record
        .values
        .iter()
        .find(|value| value.value_type.eq_ignore_ascii_case("URL"))
        .and_then(|value| value.data.as_ref())
        .and_then(|data| data.value.as_str())
}
