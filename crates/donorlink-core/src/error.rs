//! Error types for the donorlink data-access layer.
//!
//! Every failure a remote query can produce is funnelled into [`LoaderError`].
//! The loader itself never hands these to consumers as `Err`; they end up as
//! the human-readable `error` field of the loader state.

use std::time::Duration;
use thiserror::Error;

/// Main error type for donorlink.
#[derive(Debug, Error)]
pub enum LoaderError {
    // Transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    /// Failure reported by a custom remote query implementation.
    #[error("{0}")]
    Query(String),

    // Lifecycle
    #[error("Request cancelled")]
    Cancelled,

    #[error("Loader has been disposed")]
    Disposed,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for donorlink operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Timeouts land in `Network` here because the error does not carry the
/// configured duration; `HttpRecordSource` maps them to `Timeout` itself.
impl From<reqwest::Error> for LoaderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LoaderError::Decode {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            LoaderError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            LoaderError::Network {
                message: err.to_string(),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::Decode {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for LoaderError {
    fn from(err: url::ParseError) -> Self {
        LoaderError::Config {
            message: format!("invalid URL: {}", err),
        }
    }
}

impl LoaderError {
    /// Convenience constructor for free-form query failures.
    pub fn query(message: impl Into<String>) -> Self {
        LoaderError::Query(message.into())
    }

    /// Check if this error should trigger another attempt.
    ///
    /// Transient transport failures are retried; malformed responses, client
    /// errors and configuration problems are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            LoaderError::Network { .. } | LoaderError::Timeout(_) | LoaderError::Query(_) => true,
            LoaderError::Http { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            LoaderError::Decode { .. }
            | LoaderError::Cancelled
            | LoaderError::Disposed
            | LoaderError::Config { .. } => false,
        }
    }

    /// Whether this error is a cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoaderError::Cancelled)
    }
}
