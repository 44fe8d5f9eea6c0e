//! Error types for CDP connections
//!
//! Flat hierarchy. Every `call()` failure maps to exactly one variant so callers
//! can tell a timeout from an abort from a remote error.

use std::time::Duration;
use thiserror::Error;

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CDPError>;

#[derive(Error, Debug)]
pub enum CDPError {
    /// Target cannot be connected as configured (missing socket URL, double connect)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// API misuse: positional params, operating on a stopped target
    #[error("Usage error: {message}")]
    Usage { message: String },

    #[error("Calling {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// Shutdown raced an in-flight call
    #[error("Call to {method} aborted by shutdown")]
    Aborted { method: String },

    /// The remote end answered with an error object
    #[error("Calling {method} failed: {message}")]
    Call {
        method: String,
        code: Option<i64>,
        message: String,
    },

    /// Channel failure. Fatal for the whole connection.
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl CDPError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn timeout(method: impl Into<String>, budget: Duration) -> Self {
        Self::Timeout {
            method: method.into(),
            timeout_ms: budget.as_millis() as u64,
        }
    }

    pub fn aborted(method: impl Into<String>) -> Self {
        Self::Aborted {
            method: method.into(),
        }
    }

    pub fn call(method: impl Into<String>, code: Option<i64>, message: impl Into<String>) -> Self {
        Self::Call {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Transport-level failures, either reported by us or by the socket
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::WebSocket(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CDPError::call("Page.navigate", Some(-32000), "Cannot navigate to invalid URL");
        assert_eq!(
            err.to_string(),
            "Calling Page.navigate failed: Cannot navigate to invalid URL"
        );

        let err = CDPError::timeout("Runtime.evaluate", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Calling Runtime.evaluate timed out after 1500ms");
    }

    #[test]
    fn test_predicates() {
        assert!(CDPError::timeout("A.b", Duration::from_secs(1)).is_timeout());
        assert!(!CDPError::aborted("A.b").is_timeout());
        assert!(CDPError::aborted("A.b").is_aborted());
        assert!(CDPError::transport("reset").is_transport());
        assert!(!CDPError::usage("positional params").is_transport());
    }
}
