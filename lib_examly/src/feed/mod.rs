//! # Live Monitoring Feed
//!
//! Client side of the staff anti-cheat dashboard. Frames arrive from the
//! `connection` manager, are merged by the `event_store` (dedupe by id, order
//! by timestamp, keep the newest 500) and written through to local storage
//! by the `mirror`. `monitor::MonitorFeed` wires the last two together.

/// Wire and display types: `MonitorEvent`, `FeedFrame`, `Severity`.
pub mod model;
/// Bounded, deduplicated, time-ordered event collection.
pub mod event_store;
/// Write-through persistence of the event store.
pub mod mirror;
/// WebSocket connection manager with fixed-delay reconnect.
pub mod connection;
/// Store + mirror glue applied to each inbound frame.
pub mod monitor;

pub use connection::{ConnectionManager, ConnectionStatus, FeedConfig, FRAME_BUFFER};
pub use event_store::{EventStore, EVENT_CAPACITY};
pub use mirror::PersistenceMirror;
pub use model::{format_time, FeedFrame, MonitorEvent, Severity, TelegramId};
pub use monitor::{FeedChange, MonitorFeed};
