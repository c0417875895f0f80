//! # Local Key/Value Store
//!
//! String slots addressed by key. `FileStore` keeps one `<key>.json` file per
//! slot and replaces it atomically; `MemoryStore` backs tests and ephemeral
//! runs. `SessionTokenSlot` wraps the bearer-token slot.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Slot holding the serialized monitoring events.
pub const EVENTS_CACHE_KEY: &str = "teacher_monitor_events_v1";
/// Slot holding the session bearer token.
pub const SESSION_TOKEN_KEY: &str = "access_token";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

/// A string-valued key/value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

/// Stores each key as `<dir>/<key>.json`.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, handy for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(key);
        Ok(())
    }
}

/// The session bearer token slot.
pub struct SessionTokenSlot<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> SessionTokenSlot<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the stored token, treating a blank slot as absent.
    pub fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .store
            .get(SESSION_TOKEN_KEY)?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    pub fn save(&self, token: &str) -> Result<(), StorageError> {
        self.store.set(SESSION_TOKEN_KEY, token)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(SESSION_TOKEN_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "[1,2,3]").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("[1,2,3]"));

        store.set("k", "[]").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("[]"));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        // Removing twice is fine.
        store.remove("k").unwrap();
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(matches!(store.set("../escape", "x"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(store.get(""), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn session_token_slot_ignores_blank_tokens() {
        let slot = SessionTokenSlot::new(MemoryStore::new());
        assert_eq!(slot.load().unwrap(), None);

        slot.save("  ").unwrap();
        assert_eq!(slot.load().unwrap(), None);

        slot.save("jwt-abc").unwrap();
        assert_eq!(slot.load().unwrap().as_deref(), Some("jwt-abc"));

        slot.clear().unwrap();
        assert_eq!(slot.load().unwrap(), None);
    }
}
