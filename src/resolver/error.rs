//! Error types for DOI resolution.

use thiserror::Error;

/// Errors that can occur while resolving an identifier.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// HTTP client construction failed.
    #[error("resolver HTTP client construction failed: {reason}")]
    Client {
        /// Why construction failed.
        reason: String,
    },

    /// The resolution request could not be completed.
    #[error("resolution request for '{identifier}' failed: {reason}")]
    Request {
        /// The identifier being resolved.
        identifier: String,
        /// The underlying network failure.
        reason: String,
    },

    /// The resolution endpoint answered without redirecting; the identifier
    /// is unknown or the endpoint is down. Presumed permanent at this time;
    /// callers should not retry.
    #[error("DOI '{identifier}' did not resolve: no redirect occurred")]
    NotRedirected {
        /// The identifier that failed to resolve.
        identifier: String,
    },

    /// The handle registry answered with a non-success status.
    #[error("handle registry returned HTTP {status} for '{identifier}'")]
    RegistryStatus {
        /// The identifier being resolved.
        identifier: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The handle registry had no URL-typed value for the identifier.
    #[error("handle registry has no URL value for '{identifier}'")]
    NoUrlValue {
        /// The identifier being resolved.
        identifier: String,
    },

    /// A location produced during resolution is not a valid URL.
    #[error("resolved location for '{identifier}' is not a valid URL: {value}")]
    InvalidLocation {
        /// The identifier being resolved.
        identifier: String,
        /// The unparseable location value.
        value: String,
    },
}

impl ResolveError {
    /// Creates a client construction error.
    pub fn client(reason: impl Into<String>) -> Self {
        Self::Client {
            reason: reason.into(),
        }
    }

    /// Creates a request failure error.
    pub fn request(identifier: &str, reason: impl Into<String>) -> Self {
        Self::Request {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a no-redirect error.
    #[must_use]
    pub fn not_redirected(identifier: &str) -> Self {
        Self::NotRedirected {
            identifier: identifier.to_string(),
        }
    }

    /// Creates a registry status error.
    #[must_use]
    pub fn registry_status(identifier: &str, status: u16) -> Self {
        Self::RegistryStatus {
            identifier: identifier.to_string(),
            status,
        }
    }

    /// Creates a missing-URL-value error.
    #[must_use]
    pub fn no_url_value(identifier: &str) -> Self {
        Self::NoUrlValue {
            identifier: identifier.to_string(),
        }
    }

    /// Creates an invalid-location error.
    pub fn invalid_location(identifier: &str, value: impl Into<String>) -> Self {
        Self::InvalidLocation {
            identifier: identifier.to_string(),
            value: value.into(),
        }
    }
}
