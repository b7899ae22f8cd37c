//! Core types exchanged with chat backends

use serde::{Deserialize, Serialize};

/// Backend-imposed cap on attachments per exchange
pub const MAX_ATTACHMENTS: usize = 10;

/// One outgoing exchange, built from the conversation state after tool
/// preprocessing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeRequest {
    /// Prompt text sent to the backend
    pub prompt: String,
    /// Opaque attachment identifiers, at most [`MAX_ATTACHMENTS`]
    pub attachment_ids: Vec<String>,
    /// Response the new one is chained onto; `None` for a first turn
    pub parent_response_id: Option<String>,
    /// Conversation to post into; `None` starts a new conversation
    pub conversation_id: Option<String>,
}

impl ExchangeRequest {
    /// Create a request for a prompt with no history
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Attach identifiers, truncating to the backend cap
    pub fn with_attachments(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.attachment_ids = ids.into_iter().take(MAX_ATTACHMENTS).collect();
        self
    }

    /// Chain onto a parent response
    pub fn with_parent(mut self, parent_response_id: Option<String>) -> Self {
        self.parent_response_id = parent_response_id;
        self
    }

    /// Post into an existing conversation
    pub fn with_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    /// Attachment ids capped at [`MAX_ATTACHMENTS`]
    pub fn capped_attachments(&self) -> &[String] {
        let len = self.attachment_ids.len().min(MAX_ATTACHMENTS);
        &self.attachment_ids[..len]
    }
}

/// Who authored a response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sender {
    #[default]
    Assistant,
    Human,
    #[serde(other)]
    Other,
}

/// The terminal result of an exchange.
///
/// Provider-specific fields are kept verbatim in `metadata` for tools that
/// need them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredResponse {
    pub response_id: String,
    /// Full assembled text
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sender: Sender,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl StructuredResponse {
    /// Create an assistant response with no metadata
    pub fn new(response_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            message: message.into(),
            sender: Sender::Assistant,
            metadata: serde_json::Map::new(),
        }
    }

    /// Add a metadata field
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
