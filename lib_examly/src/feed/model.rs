//! # Feed Data Model
//!
//! Wire and in-memory types for the monitoring feed.

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One proctoring signal as delivered by the monitoring backend.
///
/// `id` is the deduplication key and `ts` (ISO-8601) the ordering key. Events
/// are never modified once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub id: String,
    /// Missing timestamps sort first.
    #[serde(default)]
    pub ts: String,
    pub event: String,
    pub attempt_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_id: Option<TelegramId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl MonitorEvent {
    pub fn severity(&self) -> Severity {
        Severity::from_event(&self.event)
    }
}

/// Telegram user ids arrive either as numbers or as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelegramId {
    Number(i64),
    Text(String),
}

impl fmt::Display for TelegramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelegramId::Number(n) => write!(f, "{}", n),
            TelegramId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Display-only classification derived from the event kind. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Med,
    High,
}

impl Severity {
    pub fn from_event(name: &str) -> Severity {
        let e = name.to_uppercase();
        if e.contains("DEVTOOLS") || e.contains("TIME_VIOLATION") {
            return Severity::High;
        }
        let med = ["SCREENSHOT", "COPY", "PASTE", "TAB", "BLUR", "VISIBILITY"];
        if med.iter().any(|kind| e.contains(kind)) {
            return Severity::Med;
        }
        Severity::Low
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Med => "MED",
            Severity::High => "HIGH",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inbound text frames on the monitoring socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedFrame {
    /// Bulk catch-up snapshot, sent once per connection.
    History { events: Vec<MonitorEvent> },
    /// A single newly recorded event.
    Event { event: MonitorEvent },
}

impl FeedFrame {
    /// Parses a text frame. Malformed or unrecognised frames yield `None`.
    ///
    /// History elements are decoded one by one: an element that does not
    /// match the event schema is skipped and the rest of the batch is kept.
    pub fn decode(text: &str) -> Option<FeedFrame> {
        let value = match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("Dropping malformed monitor frame: {}", e);
                return None;
            }
        };

        match value.get("type").and_then(Value::as_str) {
            Some("history") => {
                let Some(items) = value.get("events").and_then(Value::as_array) else {
                    log::debug!("Dropping history frame without an events array");
                    return None;
                };
                let events = items
                    .iter()
                    .filter_map(|item| match MonitorEvent::deserialize(item) {
                        Ok(event) => Some(event),
                        Err(e) => {
                            log::debug!("Skipping history element: {}", e);
                            None
                        }
                    })
                    .collect();
                Some(FeedFrame::History { events })
            }
            Some("event") => {
                let payload = value.get("event")?;
                match MonitorEvent::deserialize(payload) {
                    Ok(event) => Some(FeedFrame::Event { event }),
                    Err(e) => {
                        log::debug!("Dropping live event frame: {}", e);
                        None
                    }
                }
            }
            other => {
                log::debug!("Dropping unrecognised monitor frame type {:?}", other);
                None
            }
        }
    }
}

/// Renders an ISO timestamp in local time, or returns it unchanged if it
/// does not parse.
pub fn format_time(ts: &str) -> String {
    DateTime::parse_from_rfc3339(ts)
        .map(|d| d.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| ts.to_string())
}
