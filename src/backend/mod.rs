//! Browser automation backends.
//!
//! This module defines the capability contract every automation engine must
//! satisfy and the two interchangeable adapters that implement it:
//!
//! - [`AutomationBackend`] - Async trait for launch, navigate-and-evaluate,
//!   and teardown
//! - [`CdpBackend`] - Lightweight adapter that spawns a browser and drives
//!   it directly over the DevTools protocol
//! - [`StealthBackend`] - Heavier adapter built on `chromiumoxide` with
//!   automation-detection masking
//!
//! Adapters are selected at construction time via [`BackendKind`] and
//! [`create_backend`]; downstream components only ever see the trait.
//!
//! Scripts run inside the rendered page rather than via a separate HTTP
//! call so they inherit the page's authenticated session (cookies, referer,
//! any access established by prior navigation). A bare HTTP client would
//! receive a 401/402 or a paywall page instead of the document.

mod cdp;
mod error;
mod stealth;

pub use cdp::CdpBackend;
pub use error::BackendError;
pub use stealth::StealthBackend;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Contract every browser automation engine adapter must satisfy.
///
/// One live browser instance per backend instance. Pages are ephemeral:
/// every operation opens a fresh page and closes it before returning,
/// on success and on failure alike.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Box<dyn AutomationBackend>`. Rust 2024 native async traits are not
/// object-safe, so `async_trait` is required for adapter selection.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    /// Launches the browser instance, routing its traffic through `proxy`
    /// when an endpoint is given.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Launch`] when the engine executable is
    /// unavailable or the launch times out.
    async fn init(&mut self, proxy: Option<&str>) -> Result<(), BackendError>;

    /// Opens a page, navigates to `url`, waits for the page to settle,
    /// evaluates `script` (the source of a JavaScript function) applied to
    /// `args`, closes the page, and returns the script's JSON-serializable
    /// result.
    ///
    /// Values crossing the page/host boundary must be JSON-serializable;
    /// binary payloads are base64-encoded by the in-page script before
    /// crossing. The bridge is not a byte-stream channel.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Navigation`] when the page fails to load,
    /// [`BackendError::Script`] when the script throws, or
    /// [`BackendError::NotInitialized`] before a successful `init`.
    async fn goto_and_evaluate(
        &self,
        url: &str,
        script: &str,
        args: &[Value],
    ) -> Result<Value, BackendError>;

    /// Terminates the browser instance. Safe to call when `init` was never
    /// called or already failed (no-op), and safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] when teardown of a live instance fails.
    async fn close(&mut self) -> Result<(), BackendError>;
}

/// Which automation engine adapter to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Lightweight DevTools-protocol driver.
    Cdp,
    /// Stealth-capable `chromiumoxide` engine.
    Stealth,
}

impl BackendKind {
    /// The adapter's selection name (`cdp`, `stealth`).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Cdp => "cdp",
            Self::Stealth => "stealth",
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cdp" => Ok(Self::Cdp),
            "stealth" => Ok(Self::Stealth),
            other => Err(format!("unknown backend '{other}' (expected cdp or stealth)")),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Launch and page-operation options shared by all adapters.
///
/// Navigation/evaluate calls may otherwise suspend for unbounded real time
/// while a page settles; these timeouts are the caller's external timeout
/// policy.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Browser executable. `None` uses the adapter's default lookup.
    pub executable: Option<String>,
    /// Run the browser headless.
    pub headless: bool,
    /// DevTools debugging port for the CDP adapter.
    pub debug_port: u16,
    /// How long to wait for the engine to come up.
    pub launch_timeout: Duration,
    /// Overall budget for navigate + settle + evaluate per operation.
    pub navigation_timeout: Duration,
    /// Network inactivity window after load that counts as "settled".
    pub quiescence_window: Duration,
    /// User agent override. `None` keeps the engine default.
    pub user_agent: Option<String>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            debug_port: 9222,
            launch_timeout: Duration::from_secs(20),
            navigation_timeout: Duration::from_secs(60),
            quiescence_window: Duration::from_millis(500),
            user_agent: None,
        }
    }
}

/// Instantiates the adapter for `kind` with the given options.
#[must_use]
pub fn create_backend(kind: BackendKind, options: BackendOptions) -> Box<dyn AutomationBackend> {
    match kind {
        BackendKind::Cdp => Box::new(CdpBackend::new(options)),
        BackendKind::Stealth => Box::new(StealthBackend::new(options)),
    }
}

/// Renders `script` applied to JSON-encoded `args` as a single evaluatable
/// expression: `(script)(arg0, arg1, ...)`.
pub(crate) fn build_call_expression(script: &str, args: &[Value]) -> String {
    let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
    format!("({script})({})", rendered.join(", "))
}
