//! Conversation state: the response chain pointer, the conversation id and
//! the saved points a new conversation can be forked from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named checkpoint in a response chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPoint {
    pub label: String,
    pub previous_response_id: String,
}

/// Where the next exchange attaches to the backend's conversation graph.
///
/// `last_response_id` only moves when an exchange completes with a final
/// response; failed exchanges never touch this struct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    conversation_id: Option<String>,
    last_response_id: Option<String>,
    saved_points: BTreeMap<String, SavedPoint>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from persisted values. The response chain pointer is not
    /// persisted and starts empty.
    pub fn hydrate(
        conversation_id: Option<String>,
        saved_points: BTreeMap<String, SavedPoint>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.filter(|id| !id.is_empty()),
            last_response_id: None,
            saved_points,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn last_response_id(&self) -> Option<&str> {
        self.last_response_id.as_deref()
    }

    pub fn saved_points(&self) -> &BTreeMap<String, SavedPoint> {
        &self.saved_points
    }

    /// Key a saved point is stored under: `<conversation id>-<name>`
    pub fn saved_point_key(&self, name: &str) -> String {
        format!("{}-{}", self.conversation_id.as_deref().unwrap_or_default(), name)
    }

    /// Record a completed exchange.
    ///
    /// A conversation id revealed during the exchange is only taken when none
    /// was known before.
    pub(crate) fn commit(&mut self, started: Option<String>, response_id: String) {
        if self.conversation_id.is_none() {
            self.conversation_id = started.filter(|id| !id.is_empty());
        }
        self.last_response_id = Some(response_id);
    }

    /// Point at an existing conversation
    pub(crate) fn attach(&mut self, conversation_id: String, last_response_id: Option<String>) {
        self.conversation_id = Some(conversation_id);
        self.last_response_id = last_response_id;
    }

    /// Forget the current conversation; saved points are kept
    pub(crate) fn reset(&mut self) {
        self.conversation_id = None;
        self.last_response_id = None;
    }

    /// Save the current response as a named point
    pub fn save_point(&mut self, name: &str) -> Result<(String, SavedPoint)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        let previous_response_id = self
            .last_response_id
            .clone()
            .ok_or(Error::NothingToSave)?;

        let key = self.saved_point_key(name);
        let point = SavedPoint {
            label: key.clone(),
            previous_response_id,
        };
        self.saved_points.insert(key.clone(), point.clone());
        Ok((key, point))
    }

    /// Fork a new conversation from a saved point.
    ///
    /// The new conversation always gets a freshly generated id; the point
    /// itself is left as it was. Returns the new id.
    pub fn load_point(&mut self, key: &str) -> Result<String> {
        let point = self
            .saved_points
            .get(key)
            .ok_or_else(|| Error::UnknownSavedPoint(key.to_string()))?;

        let previous_response_id = point.previous_response_id.clone();
        let mut conversation_id = uuid::Uuid::new_v4().to_string();
        while self.conversation_id.as_deref() == Some(conversation_id.as_str()) {
            conversation_id = uuid::Uuid::new_v4().to_string();
        }

        self.conversation_id = Some(conversation_id.clone());
        self.last_response_id = Some(previous_response_id);
        Ok(conversation_id)
    }
}
