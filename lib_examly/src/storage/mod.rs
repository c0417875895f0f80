//! # Storage Module
//!
//! Durable key/value slots standing in for browser local storage. The live
//! feed mirrors its event cache into one slot; the session bearer token lives
//! in another.

/// The `KeyValueStore` trait with file-backed and in-memory implementations.
pub mod local_store;

pub use local_store::{
    FileStore, KeyValueStore, MemoryStore, SessionTokenSlot, StorageError, EVENTS_CACHE_KEY,
    SESSION_TOKEN_KEY,
};
