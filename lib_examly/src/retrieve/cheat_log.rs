//! # Cheat-Log Channel
//!
//! Submission side of the proctoring telemetry. Delivery is best-effort:
//!
//! - **at most once**: every entry is sent in a single request, never retried;
//! - **fire-and-forget**: `submit` returns immediately and reports nothing;
//! - **silent failure**: network errors and rejected requests are logged at
//!   debug level and otherwise dropped, so a flaky backend never disturbs the
//!   student.

use std::sync::Arc;

use reqwest::Method;
use serde::{de::IgnoredAny, Deserialize, Serialize};
use serde_json::Value;

use super::ky_http::{ApiClient, ApiError};

pub const CHEAT_LOG_PATH: &str = "api/cheat/log";

/// Body of `POST /api/cheat/log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheatLogEntry {
    pub event: String,
    pub attempt_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<i64>,
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// A best-effort sink for cheat-log entries. See the module docs for the
/// delivery contract; implementations must not block or panic.
pub trait CheatLogSink: Send + Sync {
    fn submit(&self, entry: CheatLogEntry);
}

impl<T: CheatLogSink + ?Sized> CheatLogSink for Arc<T> {
    fn submit(&self, entry: CheatLogEntry) {
        (**self).submit(entry)
    }
}

/// Posts entries to the backend on background tasks.
#[derive(Clone)]
pub struct HttpCheatLog {
    client: Arc<ApiClient>,
}

impl HttpCheatLog {
    /// Builds a retry-free client for `base_url` authenticated with `token`.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        let client = ApiClient::with_retries(base_url, Some(token.into()), 0)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Sends one entry and waits for the outcome. Returns whether the backend
    /// accepted it; failures are logged, never raised.
    pub async fn deliver(&self, entry: &CheatLogEntry) -> bool {
        deliver_with(&self.client, entry).await
    }
}

impl CheatLogSink for HttpCheatLog {
    fn submit(&self, entry: CheatLogEntry) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::debug!("No async runtime; dropping cheat log {}", entry.event);
                return;
            }
        };
        let client = Arc::clone(&self.client);
        handle.spawn(async move {
            deliver_with(&client, &entry).await;
        });
    }
}

async fn deliver_with(client: &ApiClient, entry: &CheatLogEntry) -> bool {
    match client
        .request::<IgnoredAny, _>(Method::POST, CHEAT_LOG_PATH, None, Some(entry))
        .await
    {
        Ok(resp) if resp.success => {
            log::trace!("Cheat log {} delivered for attempt {}", entry.event, entry.attempt_id);
            true
        }
        Ok(resp) => {
            log::debug!("Cheat log {} rejected with HTTP {}", entry.event, resp.status);
            false
        }
        Err(e) => {
            log::debug!("Cheat log {} not delivered: {}", entry.event, e);
            false
        }
    }
}
