//! # Monitor Feed Connection Manager
//!
//! Keeps exactly one WebSocket connection to the monitoring endpoint open and
//! forwards recognised frames to the consumer over a channel.
//! Location: lib_examly/src/feed/connection.rs
//!
//! Status moves through `Connecting -> Open -> Closed`, with `Error` reported on
//! transport failures (an error is always followed by `Closed`). After a close
//! the manager waits the configured delay and reconnects, unless the policy is
//! `Never`. `teardown` (or dropping the manager) deactivates it: the socket is
//! closed, a pending reconnect timer becomes a no-op and no further status
//! transitions are published.
//!
//! The frame channel holds at most [`FRAME_BUFFER`] frames. A stalled consumer
//! pauses socket reads instead of growing the queue; teardown still wins.

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

use crate::configs::{ReconnectPolicy, Settings};

use super::event_store::EVENT_CAPACITY;
use super::model::FeedFrame;

/// Frames queued for the consumer before the reader waits.
pub const FRAME_BUFFER: usize = EVENT_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closed => "closed",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Connection parameters for the monitoring socket.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub ws_url: String,
    pub reconnect_delay: Duration,
    pub reconnect_policy: ReconnectPolicy,
}

impl FeedConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ws_url: settings.ws_url.to_string(),
            reconnect_delay: settings.reconnect_delay,
            reconnect_policy: settings.reconnect_policy,
        }
    }
}

/// Owner-side handle of the running connection task.
pub struct ConnectionManager {
    status: watch::Receiver<ConnectionStatus>,
    frames: mpsc::Receiver<FeedFrame>,
    active: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Starts connecting immediately. Must be called from within a Tokio runtime.
    pub fn spawn(config: FeedConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        let active = CancellationToken::new();

        let task = tokio::spawn(run(config, status_tx, frames_tx, active.clone()));

        Self {
            status: status_rx,
            frames: frames_rx,
            active,
            task: Some(task),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// A receiver that wakes on every status transition.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Next decoded frame, or `None` once the connection task has stopped.
    pub async fn next_frame(&mut self) -> Option<FeedFrame> {
        self.frames.recv().await
    }

    pub fn is_active(&self) -> bool {
        !self.active.is_cancelled()
    }

    /// Deactivates the manager, closes the socket and waits for the task to exit.
    pub async fn teardown(mut self) {
        self.active.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Monitor feed task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.active.cancel();
    }
}

fn publish(status: &watch::Sender<ConnectionStatus>, active: &CancellationToken, next: ConnectionStatus) {
    if active.is_cancelled() {
        return;
    }
    log::debug!("Monitor feed status: {}", next);
    status.send_replace(next);
}

async fn run(
    config: FeedConfig,
    status: watch::Sender<ConnectionStatus>,
    frames: mpsc::Sender<FeedFrame>,
    active: CancellationToken,
) {
    loop {
        if active.is_cancelled() {
            break;
        }

        publish(&status, &active, ConnectionStatus::Connecting);
        log::info!("Connecting to monitor feed: {}", config.ws_url);

        let connected = tokio::select! {
            _ = active.cancelled() => break,
            result = connect_async(config.ws_url.as_str()) => result,
        };

        match connected {
            Ok((ws_stream, _)) => {
                publish(&status, &active, ConnectionStatus::Open);
                log::info!("Monitor feed connected.");
                let (mut write, mut read) = ws_stream.split();

                loop {
                    tokio::select! {
                        _ = active.cancelled() => {
                            let _ = write.close().await;
                            return;
                        }
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Some(frame) = FeedFrame::decode(text.as_str()) {
                                        tokio::select! {
                                            _ = active.cancelled() => {
                                                let _ = write.close().await;
                                                return;
                                            }
                                            sent = frames.send(frame) => {
                                                if sent.is_err() {
                                                    log::debug!("Feed consumer dropped; stopping connection task.");
                                                    let _ = write.close().await;
                                                    return;
                                                }
                                            }
                                        }
                                    }
                                }
                                Some(Ok(Message::Close(reason))) => {
                                    log::info!("Monitor feed closed by server: {:?}", reason);
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    log::warn!("Monitor feed read error: {}", e);
                                    publish(&status, &active, ConnectionStatus::Error);
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("Failed to connect to monitor feed: {}", e);
                publish(&status, &active, ConnectionStatus::Error);
            }
        }

        if active.is_cancelled() {
            break;
        }
        publish(&status, &active, ConnectionStatus::Closed);

        match config.reconnect_policy {
            ReconnectPolicy::Never => {
                log::info!("Monitor feed closed; reconnect disabled.");
                break;
            }
            ReconnectPolicy::Always => {
                log::info!("Monitor feed closed; reconnecting in {} ms.", config.reconnect_delay.as_millis());
                tokio::select! {
                    _ = active.cancelled() => break,
                    _ = tokio::time::sleep(config.reconnect_delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::AppConfig;

    #[test]
    fn status_renders_lowercase() {
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }

    #[test]
    fn feed_config_comes_from_settings() {
        let settings = AppConfig {
            api_base: Some("https://exam.example.org".into()),
            reconnect_delay_ms: Some(1500),
            ..Default::default()
        }
        .resolve()
        .unwrap();

        let config = FeedConfig::from_settings(&settings);
        assert_eq!(config.ws_url, "wss://exam.example.org/ws/monitor");
        assert_eq!(config.reconnect_delay, Duration::from_millis(1500));
        assert_eq!(config.reconnect_policy, ReconnectPolicy::Always);
    }

    #[tokio::test]
    async fn unreachable_endpoint_without_reconnect_ends_closed() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut manager = ConnectionManager::spawn(FeedConfig {
            ws_url: format!("ws://127.0.0.1:{}/ws/monitor", port),
            reconnect_delay: Duration::from_millis(50),
            reconnect_policy: ReconnectPolicy::Never,
        });

        let frame = tokio::time::timeout(Duration::from_secs(5), manager.next_frame())
            .await
            .expect("task should stop");
        assert_eq!(frame, None);
        assert_eq!(manager.status(), ConnectionStatus::Closed);
        manager.teardown().await;
    }
}
