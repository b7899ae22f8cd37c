//! Configuration store contract used to round-trip conversation state across
//! process runs.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    conversation::SavedPoint,
    error::{Error, Result},
};

/// Key the persisted conversation is stored under
pub const CONVERSATION_KEY: &str = "conversation";

/// Key/value persistence owned by the caller
pub trait ConfigStore: Send + Sync {
    /// Load the value stored under `key`, if any
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Replace the value stored under `key`
    fn save(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// The part of a session that outlives the process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedConversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_conversation_id: Option<String>,
    #[serde(default)]
    pub saved_points: BTreeMap<String, SavedPoint>,
}

impl PersistedConversation {
    /// Read the persisted conversation from a store
    pub fn load(store: &dyn ConfigStore) -> Result<Option<Self>> {
        match store.load(CONVERSATION_KEY)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::Store(format!("invalid persisted conversation: {}", e))),
            None => Ok(None),
        }
    }

    /// Write this record back to a store
    pub fn save(&self, store: &dyn ConfigStore) -> Result<()> {
        let value = serde_json::to_value(self).map_err(|e| Error::Store(e.to_string()))?;
        store.save(CONVERSATION_KEY, value)
    }
}

/// In-memory store, for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_record() {
        let store = MemoryStore::new();
        assert_eq!(PersistedConversation::load(&store).unwrap(), None);
    }

    #[test]
    fn test_record_round_trip_through_store() {
        let store = MemoryStore::new();
        let mut record = PersistedConversation {
            active_conversation_id: Some("c1".into()),
            ..Default::default()
        };
        record.saved_points.insert(
            "c1-checkpoint".into(),
            SavedPoint {
                label: "c1-checkpoint".into(),
                previous_response_id: "r1".into(),
            },
        );
        record.save(&store).unwrap();

        let raw = store.load(CONVERSATION_KEY).unwrap().unwrap();
        assert_eq!(raw["activeConversationId"], "c1");
        assert_eq!(
            raw["savedPoints"]["c1-checkpoint"]["previousResponseId"],
            "r1"
        );
        assert_eq!(PersistedConversation::load(&store).unwrap(), Some(record));
    }

    #[test]
    fn test_corrupt_record_is_store_error() {
        let store = MemoryStore::new();
        store
            .save(CONVERSATION_KEY, serde_json::json!({"savedPoints": 3}))
            .unwrap();
        assert!(matches!(
            PersistedConversation::load(&store),
            Err(Error::Store(_))
        ));
    }
}
