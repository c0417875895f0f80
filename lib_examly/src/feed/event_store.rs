//! # Event Store
//!
//! Bounded, deduplicated, time-ordered collection of `MonitorEvent`s.
//!
//! Entries are kept in ascending `ts` order. Sorting is stable, so events with
//! equal timestamps keep the order in which the store first saw them; events
//! new to the store follow in arrival order. Once the capacity is exceeded the
//! oldest entries (front of the ascending order) are evicted.

use std::collections::HashMap;

use super::model::MonitorEvent;

/// Maximum number of retained events.
pub const EVENT_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct EventStore {
    events: Vec<MonitorEvent>,
    capacity: usize,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    /// A store with a custom bound. A zero capacity is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, id: &str) -> bool {
        self.events.iter().any(|e| e.id == id)
    }

    /// Replaces the contents with a cached snapshot.
    ///
    /// Duplicate ids in `initial` collapse to the last occurrence.
    pub fn seed(&mut self, initial: Vec<MonitorEvent>) {
        self.events.clear();
        self.upsert_all(initial);
        self.normalize();
    }

    /// Unions a history batch by `id`; incoming entries replace existing ones.
    ///
    /// Returns how many ids were new to the store (before truncation).
    pub fn merge_history(&mut self, batch: Vec<MonitorEvent>) -> usize {
        let added = self.upsert_all(batch);
        self.normalize();
        added
    }

    /// Inserts a live event unless its `id` is already present.
    ///
    /// Returns `false` for duplicates, which leave the store untouched.
    pub fn apply_live(&mut self, event: MonitorEvent) -> bool {
        if self.contains(&event.id) {
            return false;
        }
        self.events.push(event);
        self.normalize();
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Entries in ascending `ts` order, as persisted.
    pub fn ascending(&self) -> &[MonitorEvent] {
        &self.events
    }

    /// Entries in descending `ts` order (most recent first), for display.
    pub fn descending(&self) -> impl Iterator<Item = &MonitorEvent> {
        self.events.iter().rev()
    }

    fn upsert_all(&mut self, batch: Vec<MonitorEvent>) -> usize {
        let mut index: HashMap<String, usize> = self
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();

        let mut added = 0;
        for event in batch {
            match index.get(&event.id) {
                Some(&pos) => self.events[pos] = event,
                None => {
                    index.insert(event.id.clone(), self.events.len());
                    self.events.push(event);
                    added += 1;
                }
            }
        }
        added
    }

    fn normalize(&mut self) {
        self.events.sort_by(|a, b| a.ts.cmp(&b.ts));
        if self.events.len() > self.capacity {
            let excess = self.events.len() - self.capacity;
            self.events.drain(..excess);
        }
    }
}
