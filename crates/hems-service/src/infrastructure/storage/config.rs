//! TOML configuration for the tester service.
//!
//! The file is optional: a missing file yields [`AppConfig::default()`], and
//! every field missing from an existing file takes its default, so a config
//! only needs to mention what it changes.
//!
//! ```toml
//! [service]
//! remote_ski = "1a2b3c4d5e6f708192a3b4c5d6e7f80910a1b2c3"
//! events_file = "capture.jsonl"
//! log_capacity = 1000
//!
//! [web]
//! bind_address = "127.0.0.1"
//! http_port = 8080
//! ws_port = 8081
//!
//! [logging]
//! level = "info"
//! echo_trace = false
//! echo_debug = false
//!
//! [usecases]
//! LPC = false
//! MPC = true
//! ```
//!
//! Command-line flags override individual values after loading (see
//! `main.rs`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hems_core::DEFAULT_LOG_CAPACITY;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::DEFAULT_QUEUE_DEPTH;

/// Use cases the tester knows about out of the box, all initially disabled.
pub const DEFAULT_USECASES: [&str; 8] = [
    "CEVC", "EVCEM", "EVCS", "EVCC", "EVSECC", "LPC", "LPP", "MPC",
];

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Globally known use cases and their initial enablement.
    #[serde(default = "default_usecases")]
    pub usecases: BTreeMap<String, bool>,
}

/// Registry and engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// SKI of a remote device to register at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ski: Option<String>,
    /// Newline-delimited JSON engine events to replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_file: Option<PathBuf>,
    /// Retained log lines; `0` selects the default.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Undelivered messages an observer may queue before it is evicted.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// Listener settings for the observer stream and the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebConfig {
    /// IP address both listeners bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

/// Process log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Mirror engine TRACE lines to the process log.
    #[serde(default)]
    pub echo_trace: bool,
    /// Mirror engine DEBUG lines to the process log.
    #[serde(default)]
    pub echo_debug: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_usecases() -> BTreeMap<String, bool> {
    DEFAULT_USECASES
        .iter()
        .map(|name| (name.to_string(), false))
        .collect()
}
fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}
fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_ws_port() -> u16 {
    8081
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            web: WebConfig::default(),
            logging: LoggingConfig::default(),
            usecases: default_usecases(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            remote_ski: None,
            events_file: None,
            log_capacity: default_log_capacity(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            echo_trace: false,
            echo_debug: false,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Parses configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
