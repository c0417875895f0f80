//! # Configuration Modules
//!
//! Runtime configuration for the Examly binaries: backend address, monitoring
//! socket, reconnect policy, data and log locations.

/// Layered configuration and its validated `Settings` form.
pub mod config_app;

pub use config_app::{load_config, AppConfig, ConfigError, ReconnectPolicy, Settings};
