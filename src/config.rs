//! Client configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. A TOML file (optional)
//! 3. Environment variables (`ANDROID_ADB_SERVER_PORT`, `ADB_SERVER_HOST`)
//!
//! Environment variables take precedence over file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5037;

const ENV_SERVER_PORT: &str = "ANDROID_ADB_SERVER_PORT";
const ENV_SERVER_HOST: &str = "ADB_SERVER_HOST";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,
}

/// Where the adb server listens and how to start it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to the adb executable. Looked up on `PATH` and in the Android SDK
    /// when unset.
    #[serde(default)]
    pub adb_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            adb_path: None,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Applies `ANDROID_ADB_SERVER_PORT` and `ADB_SERVER_HOST`.
    ///
    /// A port variable that is not a valid port is ignored with a warning.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var(ENV_SERVER_PORT) {
            match val.parse::<u16>() {
                Ok(port) if port != 0 => self.port = port,
                _ => tracing::warn!("ignoring invalid {}={:?}", ENV_SERVER_PORT, val),
            }
        }
        if let Ok(val) = std::env::var(ENV_SERVER_HOST) {
            if !val.is_empty() {
                self.host = val;
            }
        }
        self
    }
}

/// Tuning for [`DeviceWatcher`](crate::watcher::DeviceWatcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Events buffered before the watcher waits for the subscriber.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl WatcherConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms))
    }
}

impl Config {
    /// Parses TOML and applies environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(|e| {
            Error::with_source(ErrorKind::ParseError, "failed to parse config TOML", e)
        })?;
        config.server = config.server.with_env_overrides();
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut config = Self::default();
            config.server = config.server.with_env_overrides();
            return Ok(config);
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::with_source(
                ErrorKind::ParseError,
                format!("failed to read config file {}", path.display()),
                e,
            )
        })?;
        Self::from_toml_str(&content).map_err(|e| e.wrap(path.display()))
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_channel_capacity() -> usize {
    64
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    10_000
}
