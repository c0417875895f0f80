//! # lib_examly
//!
//! Client-side building blocks for the Examly exam platform. Each folder is
//! a feature-gated module:
//!
//! - **`configs`**: layered runtime configuration (defaults, JSON file, env/CLI).
//! - **`loggers`**: `fern` console + file logging with rotation.
//! - **`storage`**: durable key/value slots for the event cache and session token.
//! - **`feed`**: the live anti-cheat feed (event store, persistence mirror,
//!   WebSocket connection manager).
//! - **`retrieve`**: HTTP clients for the exam backend and the best-effort
//!   cheat-log channel.
//! - **`proctor`**: capture-point classification and the scoped proctoring session.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "feed")]
pub mod feed;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "proctor")]
pub mod proctor;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "storage")]
pub mod storage;
