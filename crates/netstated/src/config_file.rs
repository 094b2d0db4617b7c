//! Configuration file support for netstated
//!
//! Loads and validates netstated configuration from TOML files.
//! Default location: /etc/sonic/netstated.conf

use crate::change::{Change, Filter};
use crate::error::{Result, WatchError};
use crate::netlink::{DEFAULT_RECEIVE_BUFFER_SIZE, DEFAULT_SOCKET_RECEIVE_BUFFER};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/netstated.conf";

/// Smallest datagram buffer that can hold a link notification with its
/// attributes
const MIN_RECEIVE_BUFFER_SIZE: usize = 4096;

/// Watcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Changes buffered per subscriber before delivery blocks the watch loop
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// Size of the buffer used for each netlink receive
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,

    /// Kernel socket receive buffer (SO_RCVBUF) in bytes
    #[serde(default = "default_socket_receive_buffer")]
    pub socket_receive_buffer: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// One interface the daemon reports changes for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Interface name
    pub interface: String,

    /// Change names to report, or `["any"]`
    #[serde(default = "default_changes")]
    pub changes: Vec<String>,
}

impl SubscriptionConfig {
    /// Convert the configured change names to a filter
    ///
    /// An empty list is rejected: it would subscribe to nothing.
    pub fn filter(&self) -> Result<Filter> {
        if self.changes.is_empty() {
            return Err(WatchError::Configuration(format!(
                "interface {}: empty change list, use [\"any\"] for every change",
                self.interface
            )));
        }
        if self.changes.iter().any(|c| c == "any") {
            return Ok(Filter::Any);
        }

        self.changes
            .iter()
            .map(|c| c.parse::<Change>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Filter::only)
            .map_err(|e| {
                WatchError::Configuration(format!("interface {}: {}", self.interface, e))
            })
    }
}

/// Complete netstated configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetstatedConfig {
    /// Watcher configuration
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Interfaces to report changes for
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

// Default functions
fn default_subscriber_capacity() -> usize {
    1
}

fn default_receive_buffer_size() -> usize {
    DEFAULT_RECEIVE_BUFFER_SIZE
}

fn default_socket_receive_buffer() -> usize {
    DEFAULT_SOCKET_RECEIVE_BUFFER
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_changes() -> Vec<String> {
    vec!["any".to_string()]
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: default_subscriber_capacity(),
            receive_buffer_size: default_receive_buffer_size(),
            socket_receive_buffer: default_socket_receive_buffer(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WatcherConfig {
    /// Validate watcher settings
    pub fn validate(&self) -> Result<()> {
        if self.subscriber_capacity == 0 {
            return Err(WatchError::Configuration(
                "subscriber_capacity must be > 0".to_string(),
            ));
        }

        if self.receive_buffer_size < MIN_RECEIVE_BUFFER_SIZE {
            return Err(WatchError::Configuration(format!(
                "receive_buffer_size must be >= {}",
                MIN_RECEIVE_BUFFER_SIZE
            )));
        }

        Ok(())
    }
}

impl NetstatedConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    WatchError::Configuration(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(WatchError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            WatchError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path.as_ref(), content)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.watcher.validate()?;

        for sub in &self.subscriptions {
            if sub.interface.is_empty() {
                return Err(WatchError::Configuration(
                    "subscription interface must not be empty".to_string(),
                ));
            }
            sub.filter()?;
        }

        Ok(())
    }
}
