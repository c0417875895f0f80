//! # Application Configuration
//!
//! Layered configuration shared by the Examly binaries. Sources are merged in
//! increasing priority: built-in defaults, an optional JSON config file, then
//! environment variables and command-line flags (both handled by `clap`).
//! The merged `AppConfig` is resolved into validated `Settings` before use.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Backend used when nothing else is configured.
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
/// Delay between a socket close and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 900;
/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "examly.conf";

const MONITOR_PATH: &str = "ws/monitor";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("unknown log level '{0}'")]
    UnknownLogLevel(String),
}

/// What the feed connection does after the socket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Retry after the fixed reconnect delay, indefinitely.
    #[default]
    Always,
    /// Stay closed.
    Never,
}

/// Raw, mergeable configuration. Every field is optional so that each layer
/// only overrides what it actually sets.
#[derive(Args, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[arg(long = "config", env = "EXAMLY_CONFIG", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "EXAMLY_API_URL", help = "Base URL of the Examly backend.")]
    pub api_base: Option<String>,

    #[arg(long, env = "EXAMLY_WS_URL", help = "Monitoring WebSocket URL (derived from the API base when absent).")]
    pub ws_url: Option<String>,

    #[arg(long, env = "EXAMLY_RECONNECT_DELAY_MS", help = "Delay in milliseconds before reconnecting the monitoring socket.")]
    pub reconnect_delay_ms: Option<u64>,

    #[arg(long, value_enum, env = "EXAMLY_RECONNECT", help = "Reconnect policy for the monitoring socket.")]
    pub reconnect_policy: Option<ReconnectPolicy>,

    #[arg(long, env = "EXAMLY_DATA_DIR", help = "Directory holding the event cache and session token.")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, env = "EXAMLY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "EXAMLY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Built-in defaults, the lowest-priority layer.
    pub fn defaults() -> Self {
        Self {
            config_path: None,
            api_base: Some(DEFAULT_API_BASE.to_string()),
            ws_url: None,
            reconnect_delay_ms: Some(DEFAULT_RECONNECT_DELAY_MS),
            reconnect_policy: Some(ReconnectPolicy::Always),
            data_dir: Some(default_data_dir()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
        }
    }

    /// Merges two configs, where `other` overrides `self` for `Some` values.
    pub fn merge(self, other: AppConfig) -> AppConfig {
        AppConfig {
            config_path: other.config_path.or(self.config_path),
            api_base: other.api_base.or(self.api_base),
            ws_url: other.ws_url.or(self.ws_url),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            reconnect_policy: other.reconnect_policy.or(self.reconnect_policy),
            data_dir: other.data_dir.or(self.data_dir),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    /// Validates the merged config. Missing values fall back to the defaults.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let merged = AppConfig::defaults().merge(self);

        let api_base = normalize_base(merged.api_base.as_deref().unwrap_or(DEFAULT_API_BASE))?;
        let ws_url = match merged.ws_url.as_deref() {
            Some(raw) => Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
                url: raw.to_string(),
                source,
            })?,
            None => derive_monitor_url(&api_base)?,
        };

        let log_level = merged.log_level.unwrap_or_else(|| "info".to_string()).to_lowercase();
        if !matches!(log_level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return Err(ConfigError::UnknownLogLevel(log_level));
        }

        Ok(Settings {
            api_base,
            ws_url,
            reconnect_delay: Duration::from_millis(
                merged.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            ),
            reconnect_policy: merged.reconnect_policy.unwrap_or_default(),
            data_dir: merged.data_dir.unwrap_or_else(default_data_dir),
            log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level,
        })
    }
}

/// Validated runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Backend base URL, always ending in `/` so relative paths join beneath it.
    pub api_base: Url,
    pub ws_url: Url,
    pub reconnect_delay: Duration,
    pub reconnect_policy: ReconnectPolicy,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
}

/// Merges defaults, the config file and the already-parsed CLI/env layer.
///
/// A missing or unreadable file is not an error; it is logged and skipped.
pub fn load_config(cli: AppConfig) -> AppConfig {
    let mut current = AppConfig::defaults();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<AppConfig>(&config_str) {
                Ok(file_config) => current = current.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    } else {
        log::debug!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    current.merge(cli)
}

/// Parses a backend base URL and makes sure its path ends in `/`.
pub fn normalize_base(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Maps `http(s)://host/prefix/` to `ws(s)://host/prefix/ws/monitor`.
pub fn derive_monitor_url(api_base: &Url) -> Result<Url, ConfigError> {
    let scheme = match api_base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };

    let mut url = api_base.clone();
    url.set_scheme(scheme)
        .map_err(|_| ConfigError::UnsupportedScheme(api_base.scheme().to_string()))?;
    url.set_query(None);
    url.set_fragment(None);

    url.join(MONITOR_PATH).map_err(|source| ConfigError::InvalidUrl {
        url: api_base.to_string(),
        source,
    })
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("examly"))
        .unwrap_or_else(|| PathBuf::from(".examly"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn merge_prefers_the_overriding_layer() {
        let base = AppConfig {
            api_base: Some("http://file:8000".into()),
            log_level: Some("debug".into()),
            ..Default::default()
        };
        let cli = AppConfig {
            api_base: Some("http://cli:9000".into()),
            ..Default::default()
        };

        let merged = base.merge(cli);
        assert_eq!(merged.api_base.as_deref(), Some("http://cli:9000"));
        assert_eq!(merged.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn resolve_derives_the_monitor_socket_from_the_api_base() {
        let settings = AppConfig {
            api_base: Some("http://127.0.0.1:8000".into()),
            ..Default::default()
        }
        .resolve()
        .unwrap();

        assert_eq!(settings.api_base.as_str(), "http://127.0.0.1:8000/");
        assert_eq!(settings.ws_url.as_str(), "ws://127.0.0.1:8000/ws/monitor");
        assert_eq!(settings.reconnect_delay, Duration::from_millis(900));
        assert_eq!(settings.reconnect_policy, ReconnectPolicy::Always);
    }

    #[test]
    fn https_base_with_prefix_maps_to_wss_under_the_prefix() {
        let base = normalize_base("https://exam.example.org/backend").unwrap();
        assert_eq!(base.as_str(), "https://exam.example.org/backend/");

        let ws = derive_monitor_url(&base).unwrap();
        assert_eq!(ws.as_str(), "wss://exam.example.org/backend/ws/monitor");
    }

    #[test]
    fn explicit_ws_url_wins_over_derivation() {
        let settings = AppConfig {
            ws_url: Some("ws://10.0.0.5:8000/ws/monitor".into()),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(settings.ws_url.as_str(), "ws://10.0.0.5:8000/ws/monitor");
    }

    #[test]
    fn non_http_base_is_rejected() {
        let base = Url::parse("ftp://example.org/").unwrap();
        assert!(matches!(
            derive_monitor_url(&base),
            Err(ConfigError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let result = AppConfig {
            log_level: Some("loud".into()),
            ..Default::default()
        }
        .resolve();
        assert!(matches!(result, Err(ConfigError::UnknownLogLevel(_))));
    }

    #[test]
    fn load_config_layers_file_under_cli() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"apiBase": "http://from-file:8000", "reconnectDelayMs": 2500, "reconnectPolicy": "never"}}"#
        )
        .unwrap();

        let cli = AppConfig {
            config_path: Some(file.path().to_path_buf()),
            reconnect_delay_ms: Some(100),
            ..Default::default()
        };

        let merged = load_config(cli);
        assert_eq!(merged.api_base.as_deref(), Some("http://from-file:8000"));
        assert_eq!(merged.reconnect_delay_ms, Some(100));
        assert_eq!(merged.reconnect_policy, Some(ReconnectPolicy::Never));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let merged = load_config(AppConfig {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        });
        assert_eq!(merged.api_base.as_deref(), Some(DEFAULT_API_BASE));
    }
}
