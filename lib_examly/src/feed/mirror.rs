//! # Persistence Mirror
//!
//! Writes the event store through to a single key/value slot and reads it back
//! at startup. A missing or corrupt slot loads as an empty collection.

use crate::storage::{KeyValueStore, StorageError, EVENTS_CACHE_KEY};

use super::event_store::EventStore;
use super::model::MonitorEvent;

pub struct PersistenceMirror<S: KeyValueStore> {
    store: S,
    key: String,
}

impl<S: KeyValueStore> PersistenceMirror<S> {
    /// Mirror bound to the default events slot.
    pub fn new(store: S) -> Self {
        Self::with_key(store, EVENTS_CACHE_KEY)
    }

    pub fn with_key(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the cached events. Never fails: unreadable or malformed data is
    /// logged and treated as empty.
    pub fn load(&self) -> Vec<MonitorEvent> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("Event cache '{}' unreadable, starting empty: {}", self.key, e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<MonitorEvent>>(&raw) {
            Ok(events) => events,
            Err(e) => {
                log::warn!("Event cache '{}' is corrupt, starting empty: {}", self.key, e);
                Vec::new()
            }
        }
    }

    /// Serializes the store's ascending view into the slot.
    pub fn save(&self, events: &EventStore) -> Result<(), StorageError> {
        let json = serde_json::to_string(events.ascending())?;
        self.store.set(&self.key, &json)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(&self.key)
    }
}
