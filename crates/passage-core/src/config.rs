//! Configuration types and loading for passage.
//!
//! Configuration is optional and loaded from `~/.config/passage/config.toml`.
//!
//! # Error Handling
//!
//! - If the config file doesn't exist, default values are returned.
//! - If the config file exists but is invalid, an error is returned (fail fast).
//!
//! # Example Configuration
//!
//! ```toml
//! [socket]
//! path = "/home/me/.passage.sock"
//!
//! [limits]
//! max_connections = 64        # concurrent connections being served
//! read_timeout = 10           # seconds to wait for a complete request
//! query_timeout = 60          # seconds to wait for the keychain
//! max_request_bytes = 65536
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::DEFAULT_MAX_REQUEST_BYTES;

/// File name of the socket in the user's home directory.
pub const SOCKET_FILE_NAME: &str = ".passage.sock";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Socket configuration.
    pub socket: SocketConfig,
    /// Resource limits.
    pub limits: LimitsConfig,
}

/// Where the daemon listens.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SocketConfig {
    /// Socket path override (default: `~/.passage.sock`).
    pub path: Option<PathBuf>,
}

/// Limits applied to each connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of connections served at once (default: 64).
    pub max_connections: usize,
    /// Seconds to wait for a client to send its request (default: 10).
    pub read_timeout: u64,
    /// Seconds to wait for the credential store (default: 60).
    pub query_timeout: u64,
    /// Largest accepted request in bytes (default: 64 KiB).
    pub max_request_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 64,
            read_timeout: 10,
            query_timeout: 60,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl LimitsConfig {
    /// Time allowed for reading a request.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    /// Time allowed for a credential store query.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }
}

/// Returns `~/.passage.sock`, or `None` if the home directory is unknown.
pub fn default_socket_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(SOCKET_FILE_NAME))
}

impl Config {
    /// Returns the default configuration file path.
    ///
    /// Returns `~/.config/passage/config.toml` using `dirs::config_dir()`,
    /// or `None` if the config directory cannot be determined.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("passage").join("config.toml"))
    }

    /// Load configuration from the default path.
    ///
    /// - Returns `Ok(Config::default())` if no config file exists.
    /// - Returns `Err` if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_connections",
                reason: "must be at least 1",
            });
        }
        if self.limits.read_timeout == 0 || self.limits.query_timeout == 0 {
            return Err(ConfigError::Invalid {
                field: "limits",
                reason: "timeouts must be at least 1 second",
            });
        }
        if self.limits.max_request_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_request_bytes",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// The socket path to bind: the configured one, or `~/.passage.sock`.
    pub fn socket_path(&self) -> Option<PathBuf> {
        self.socket.path.clone().or_else(default_socket_path)
    }
}
