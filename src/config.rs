//! Environment-driven configuration for the server binary.

use std::env;

use crate::backend::BackendKind;

/// Default proxy specification shared by the CLI and the server.
pub const DEFAULT_PROXY: &str = "socks5://localhost:1234";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;

/// Listener and pipeline settings for server mode.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub host: String,
    /// Port the listener binds to.
    pub port: u16,
    /// Proxy specification handed to the pipeline.
    pub proxy: String,
    /// Automation backend adapter to instantiate.
    pub backend: BackendKind,
}

impl ServerConfig {
    /// Reads configuration from `SERVER_HOST`, `SERVER_PORT`, `PROXY`, and
    /// `DOIFETCH_BACKEND`, falling back to the stated defaults for any
    /// variable that is absent or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: env::var("SERVER_PORT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            proxy: env::var("PROXY").unwrap_or_else(|_| DEFAULT_PROXY.to_string()),
            backend: env::var("DOIFETCH_BACKEND")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(BackendKind::Cdp),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            proxy: DEFAULT_PROXY.to_string(),
            backend: BackendKind::Cdp,
        }
    }
}
