//! # Proctoring
//!
//! Capture points for a running attempt. The pure rules that turn page
//! events into [`CheatSignal`]s live in `signals`; `ProctorSession` wires
//! them to a cheat-log sink for the lifetime of one attempt.

pub mod session;
pub mod signals;
pub mod watermark;

pub use session::{now_iso, AttemptContext, BlurChange, Overlay, ProctorSession, Reaction, Tone};
pub use signals::{classify_hidden, classify_key, CheatSignal, DriftDetector, KeyPress};
pub use watermark::watermark_text;
