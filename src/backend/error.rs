//! Error types for automation backends.

use thiserror::Error;

/// Errors that can occur while driving a browser automation engine.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The engine could not be launched (missing executable, launch timeout).
    /// Fatal to the session; callers should not retry.
    #[error("automation engine failed to launch: {reason}")]
    Launch {
        /// Why the launch failed.
        reason: String,
    },

    /// A page operation was attempted before `init` succeeded.
    #[error("automation backend used before init")]
    NotInitialized,

    /// Navigation to a URL failed or timed out.
    #[error("navigation to {url} failed: {reason}")]
    Navigation {
        /// The URL that failed to load.
        url: String,
        /// Why navigation failed.
        reason: String,
    },

    /// The in-page script threw or could not be evaluated.
    #[error("in-page script failed: {reason}")]
    Script {
        /// The exception text or protocol error.
        reason: String,
    },

    /// A DevTools protocol call was rejected or never answered.
    #[error("DevTools call {method} failed: {message}")]
    Protocol {
        /// The protocol method that failed.
        method: String,
        /// The remote error message or timeout description.
        message: String,
    },

    /// The page/host bridge carried a malformed or unexpected payload.
    #[error("page bridge payload invalid: {reason}")]
    Bridge {
        /// What was wrong with the payload.
        reason: String,
    },
}

impl BackendError {
    /// Creates a launch error.
    pub fn launch(reason: impl Into<String>) -> Self {
        Self::Launch {
            reason: reason.into(),
        }
    }

    /// Creates a navigation error.
    pub fn navigation(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a script error.
    pub fn script(reason: impl Into<String>) -> Self {
        Self::Script {
            reason: reason.into(),
        }
    }

    /// Creates a bridge error.
    pub fn bridge(reason: impl Into<String>) -> Self {
        Self::Bridge {
            reason: reason.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            method: method.into(),
            message: message.into(),
        }
    }
}
