//! # Monitor Feed
//!
//! Ties the event store to its persistence mirror: seeded from the mirror on
//! open, written through after every mutation.

use crate::storage::{KeyValueStore, StorageError};

use super::event_store::EventStore;
use super::mirror::PersistenceMirror;
use super::model::{FeedFrame, MonitorEvent};

/// What applying a frame did to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedChange {
    /// A history batch was merged. `added` counts ids new to the store.
    History { added: usize, total: usize },
    /// A live event was stored.
    Live(MonitorEvent),
    /// A live event whose id was already present; nothing changed.
    Duplicate,
}

pub struct MonitorFeed<S: KeyValueStore> {
    store: EventStore,
    mirror: PersistenceMirror<S>,
}

impl<S: KeyValueStore> MonitorFeed<S> {
    /// Opens the feed with the default store bound, seeded from the mirror.
    pub fn open(mirror: PersistenceMirror<S>) -> Self {
        Self::open_with_store(mirror, EventStore::new())
    }

    pub fn open_with_store(mirror: PersistenceMirror<S>, mut store: EventStore) -> Self {
        let cached = mirror.load();
        if !cached.is_empty() {
            log::info!("Seeding monitor feed with {} cached events.", cached.len());
        }
        store.seed(cached);
        Self { store, mirror }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Most recent first.
    pub fn events_desc(&self) -> impl Iterator<Item = &MonitorEvent> {
        self.store.descending()
    }

    pub fn apply(&mut self, frame: FeedFrame) -> FeedChange {
        let change = match frame {
            FeedFrame::History { events } => {
                let added = self.store.merge_history(events);
                FeedChange::History {
                    added,
                    total: self.store.len(),
                }
            }
            FeedFrame::Event { event } => {
                if self.store.apply_live(event.clone()) {
                    FeedChange::Live(event)
                } else {
                    return FeedChange::Duplicate;
                }
            }
        };
        self.persist();
        change
    }

    /// Empties the store and its persisted mirror.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.store.clear();
        self.mirror.clear()
    }

    fn persist(&self) {
        if let Err(e) = self.mirror.save(&self.store) {
            log::warn!("Failed to persist monitor events to '{}': {}", self.mirror.key(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore, EVENTS_CACHE_KEY};
    use serde_json::json;
    use std::sync::Arc;

    fn ev(id: &str, ts: &str, kind: &str) -> MonitorEvent {
        serde_json::from_value(json!({
            "id": id, "ts": ts, "event": kind, "attempt_id": 11, "exam_id": 2
        }))
        .unwrap()
    }

    #[test]
    fn apply_writes_through_and_reports_changes() {
        let kv = Arc::new(MemoryStore::new());
        let mut feed = MonitorFeed::open(PersistenceMirror::new(kv.clone()));

        let change = feed.apply(FeedFrame::History {
            events: vec![ev("a", "T1", "COPY"), ev("b", "T2", "PASTE")],
        });
        assert_eq!(change, FeedChange::History { added: 2, total: 2 });

        let duplicate = feed.apply(FeedFrame::Event { event: ev("a", "T1", "COPY") });
        assert_eq!(duplicate, FeedChange::Duplicate);

        let live = ev("c", "T3", "WINDOW_BLUR");
        assert_eq!(
            feed.apply(FeedFrame::Event { event: live.clone() }),
            FeedChange::Live(live)
        );

        let persisted: Vec<MonitorEvent> =
            serde_json::from_str(&kv.get(EVENTS_CACHE_KEY).unwrap().unwrap()).unwrap();
        let ids: Vec<_> = persisted.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let shown: Vec<_> = feed.events_desc().map(|e| e.id.as_str()).collect();
        assert_eq!(shown, vec!["c", "b", "a"]);
    }

    #[test]
    fn reopening_restores_from_the_mirror() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::new(dir.path()).unwrap();
            let mut feed = MonitorFeed::open(PersistenceMirror::new(store));
            feed.apply(FeedFrame::Event { event: ev("x", "T9", "TAB_SWITCH") });
            feed.apply(FeedFrame::Event { event: ev("w", "T1", "COPY") });
        }

        let store = FileStore::new(dir.path()).unwrap();
        let feed = MonitorFeed::open(PersistenceMirror::new(store));
        let ids: Vec<_> = feed.store().ascending().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["w", "x"]);
    }

    #[test]
    fn clear_empties_store_and_mirror() {
        let kv = Arc::new(MemoryStore::new());
        let mut feed = MonitorFeed::open(PersistenceMirror::new(kv.clone()));
        feed.apply(FeedFrame::Event { event: ev("a", "T1", "COPY") });

        feed.clear().unwrap();
        assert!(feed.is_empty());
        assert_eq!(kv.get(EVENTS_CACHE_KEY).unwrap(), None);

        let reopened = MonitorFeed::open(PersistenceMirror::new(kv));
        assert!(reopened.is_empty());
    }

    #[test]
    fn oversized_cache_is_truncated_on_open() {
        let kv = Arc::new(MemoryStore::new());
        let events: Vec<_> = (0..8).map(|i| ev(&format!("e{}", i), &format!("T{}", i), "COPY")).collect();
        kv.set(EVENTS_CACHE_KEY, &serde_json::to_string(&events).unwrap()).unwrap();

        let feed = MonitorFeed::open_with_store(PersistenceMirror::new(kv), EventStore::with_capacity(5));
        assert_eq!(feed.len(), 5);
        assert_eq!(feed.store().ascending()[0].id, "e3");
    }
}
