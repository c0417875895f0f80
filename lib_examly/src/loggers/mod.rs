/// `fern` console + file logging with old-log cleanup.
pub mod logger;

pub use logger::{parse_level, setup_logging};
