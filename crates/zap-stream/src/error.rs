//! Error types for zap-stream

use std::time::Duration;

use thiserror::Error;

/// Result type alias using zap-stream Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end an exchange with a chat backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend answered with an explicit error payload
    #[error("Provider error: {message} (code: {code})")]
    Provider { code: String, message: String },

    /// Transport-level failure (side channel, body read, connectivity)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response carried no body to stream from
    #[error("No response body")]
    NoBody,

    /// The stream closed before a final response arrived
    #[error("Stream ended without a final response")]
    IncompleteStream,

    /// No terminal event arrived before the exchange deadline
    #[error("Response timeout after {0:?}")]
    Timeout(Duration),

    /// The exchange was cancelled by the caller
    #[error("Request aborted")]
    Aborted,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a provider error from a code and message
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Whether this error belongs to the transport class (as opposed to a
    /// provider-reported failure or a local timeout).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Transport(_) | Error::NoBody | Error::IncompleteStream
        )
    }

    /// Hint for callers deciding whether to offer a retry.
    ///
    /// The session engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Transport(_) | Error::Timeout(_) => true,
            Error::Provider { code, message } => {
                let msg = message.to_lowercase();
                code == "429"
                    || code.starts_with('5')
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }
}
