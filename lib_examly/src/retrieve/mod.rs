//! # Data Retrieval Module
//!
//! HTTP access to the Examly backend.
//!
//! - **`ky_http`**: generic `ApiClient` on `reqwest` + `reqwest-middleware`
//!   with optional exponential-backoff retries and `detail` error extraction.
//! - **`examly_api`**: typed auth, student and teacher endpoints.
//! - **`cheat_log`**: the best-effort, at-most-once cheat-log channel.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;
/// Typed endpoints of the exam backend.
pub mod examly_api;
/// Fire-and-forget cheat-log submission.
pub mod cheat_log;

pub use cheat_log::{CheatLogEntry, CheatLogSink, HttpCheatLog};
pub use examly_api::{Exam, ExamlyApi, Session, User};
pub use ky_http::{ApiClient, ApiError, ApiResponse};
