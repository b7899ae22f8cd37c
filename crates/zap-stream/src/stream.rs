//! Streaming event types

use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::{error::Error, types::StructuredResponse};

/// Events produced while an exchange streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A content fragment, in arrival order
    Token { text: String },
    /// The backend revealed the id of a newly created conversation
    ConversationStarted { conversation_id: String },
    /// Final structured response
    Final { response: StructuredResponse },
    /// Explicit error payload from the backend
    ProviderError { code: String, message: String },
    /// The transport failed mid-stream
    TransportError { message: String },
    /// No terminal event arrived in time (synthesized by the session engine)
    Timeout,
}

impl StreamEvent {
    /// Create a token event
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { text: text.into() }
    }

    /// Create a provider error event
    pub fn provider_error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderError {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a transport error event from a failed read
    pub fn transport_error(error: &Error) -> Self {
        let message = match error {
            Error::Transport(message) => message.clone(),
            other => other.to_string(),
        };
        Self::TransportError { message }
    }

    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Final { .. }
                | StreamEvent::ProviderError { .. }
                | StreamEvent::TransportError { .. }
                | StreamEvent::Timeout
        )
    }

    /// The error a non-final terminal event stands for
    pub fn into_error(self) -> Option<Error> {
        match self {
            StreamEvent::ProviderError { code, message } => Some(Error::Provider { code, message }),
            StreamEvent::TransportError { message } => Some(Error::Transport(message)),
            _ => None,
        }
    }

    /// Get the final response if this is a Final event
    pub fn into_response(self) -> Option<StructuredResponse> {
        match self {
            StreamEvent::Final { response } => Some(response),
            _ => None,
        }
    }
}

/// A lazy, finite stream of events for one exchange
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
