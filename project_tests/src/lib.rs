//! # Integration Test Support
//!
//! Local stand-ins for the Examly backend, bound to random ports so tests
//! never touch the network:
//!
//! - [`MockFeedServer`]: a scripted monitoring WebSocket that counts accepts.
//! - [`MockHttpServer`]: a canned-response HTTP/1.1 server that records every
//!   request it receives.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

/// What the feed server does after sending a connection's frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFrames {
    /// Send a close frame right away.
    Close,
    /// Keep the socket open until the client leaves.
    Hold,
}

/// Frames to send on one accepted connection.
#[derive(Debug, Clone)]
pub struct FeedScript {
    pub frames: Vec<String>,
    pub then: AfterFrames,
}

impl FeedScript {
    pub fn hold(frames: Vec<String>) -> Self {
        Self {
            frames,
            then: AfterFrames::Hold,
        }
    }

    pub fn close(frames: Vec<String>) -> Self {
        Self {
            frames,
            then: AfterFrames::Close,
        }
    }
}

/// Monitoring socket serving one script per accepted connection, in order.
/// Connections beyond the scripted ones are held open silently.
pub struct MockFeedServer {
    addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockFeedServer {
    pub async fn start(scripts: Vec<FeedScript>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.context("bind feed server")?;
        let addr = listener.local_addr()?;
        let accepts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepts);
        let mut scripts: VecDeque<FeedScript> = scripts.into();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let script = scripts.pop_front().unwrap_or_else(|| FeedScript::hold(Vec::new()));
                tokio::spawn(serve_feed(stream, script));
            }
        });

        Ok(Self { addr, accepts, task })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws/monitor", self.addr)
    }

    /// TCP connections accepted so far.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Polls until at least `n` connections were accepted or `timeout` passes.
    pub async fn wait_for_accepts(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.accepts() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.accepts() >= n
    }
}

impl Drop for MockFeedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_feed(stream: TcpStream, script: FeedScript) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    for frame in script.frames {
        if ws.send(Message::text(frame)).await.is_err() {
            return;
        }
    }
    match script.then {
        AfterFrames::Close => {
            let _ = ws.close(None).await;
            while let Some(Ok(_)) = ws.next().await {}
        }
        AfterFrames::Hold => while let Some(Ok(_)) = ws.next().await {},
    }
}

/// A request as received by [`MockHttpServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
struct Route {
    method: String,
    path: String,
    status: u16,
    body: String,
}

/// Builder for [`MockHttpServer`] routes. Unmatched requests get a 404 with
/// a `detail` body.
#[derive(Debug, Default)]
pub struct MockHttpBuilder {
    routes: Vec<Route>,
}

impl MockHttpBuilder {
    pub fn route(mut self, method: &str, path: &str, status: u16, body: Value) -> Self {
        self.routes.push(Route {
            method: method.to_uppercase(),
            path: path.to_string(),
            status,
            body: body.to_string(),
        });
        self
    }

    /// A route answering with a raw, possibly non-JSON, body.
    pub fn raw_route(mut self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.routes.push(Route {
            method: method.to_uppercase(),
            path: path.to_string(),
            status,
            body: body.to_string(),
        });
        self
    }

    pub async fn start(self) -> Result<MockHttpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await.context("bind http server")?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let routes = Arc::new(self.routes);

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve_http(stream, &routes, &recorded).await;
                });
            }
        });

        Ok(MockHttpServer { addr, requests, task })
    }
}

pub struct MockHttpServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl MockHttpServer {
    pub fn builder() -> MockHttpBuilder {
        MockHttpBuilder::default()
    }

    /// Base URL without a trailing slash, e.g. `http://127.0.0.1:40123`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Polls until at least `n` requests were recorded or `timeout` passes.
    pub async fn wait_for_requests(&self, n: usize, timeout: Duration) -> Vec<RecordedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let requests = self.requests();
            if requests.len() >= n || tokio::time::Instant::now() >= deadline {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_http(
    stream: TcpStream,
    routes: &[Route],
    recorded: &Mutex<Vec<RecordedRequest>>,
) -> Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    let (status, response_body) = routes
        .iter()
        .find(|r| r.method == method && r.path == path)
        .map(|r| (r.status, r.body.clone()))
        .unwrap_or((404, r#"{"detail":"Not Found"}"#.to_string()));

    if let Ok(mut log) = recorded.lock() {
        log.push(RecordedRequest {
            method,
            path,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        response_body.len(),
        response_body
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        _ => "Internal Server Error",
    }
}
