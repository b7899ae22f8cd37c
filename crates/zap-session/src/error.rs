//! Error types for zap-session

use thiserror::Error;

use crate::tool::ToolError;

/// Result type alias using zap-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the streaming layer
    #[error(transparent)]
    Stream(#[from] zap_stream::Error),

    /// The active tool rejected the prompt
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// A saved point needs a response to point at
    #[error("Nothing to save: the conversation has no response yet")]
    NothingToSave,

    /// Saved point names must not be empty
    #[error("Saved point name is empty")]
    EmptyName,

    #[error("Unknown saved point: {0}")]
    UnknownSavedPoint(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The configuration store failed to load or save
    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether the exchange ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Stream(zap_stream::Error::Timeout(_)))
    }

    /// Whether the caller aborted the exchange
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Stream(zap_stream::Error::Aborted))
    }

    /// Whether sending the same input again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Stream(e) => e.is_retryable(),
            _ => false,
        }
    }
}
