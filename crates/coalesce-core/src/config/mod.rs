//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and `#[serde(default)]`
//! 2. **Config file**: TOML file named by the `COALESCE_CONFIG` env var
//!    (default `config/config.toml`, optional)
//! 3. **Environment variables**: `COALESCE__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: bind address, port and response buffering limit
//! - [`DedupConfig`]: coordinator TTL, capacity and batching
//! - [`LoggingConfig`]: log level and format
//! - [`MetricsConfig`]: Prometheus `/metrics` endpoint
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 3030
//!
//! [dedup]
//! ttl_ms = 2000
//! max_pending = 500
//! batch_size = 25
//! ```

use crate::coordinator::{DedupConfig, DedupConfigError};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path};
use thiserror::Error;

const ENV_PREFIX: &str = "COALESCE";
const CONFIG_PATH_VAR: &str = "COALESCE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Errors from loading or validating [`AppConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid dedup settings: {0}")]
    Dedup(#[from] DedupConfigError),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `3030`.
    pub bind_port: u16,

    /// Largest response body the dedup middleware will buffer and share.
    /// Defaults to 4 MiB.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1".to_string(), bind_port: 3030, max_body_bytes: 4 << 20 }
    }
}

/// Prometheus metrics export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether `/metrics` is served. Defaults to `true`.
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub dedup: DedupConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error. Environment variables with the
    /// `COALESCE__` prefix override any value, using `__` between nested
    /// fields (e.g., `COALESCE__DEDUP__TTL_MS=2000`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file cannot be parsed or a value
    /// has the wrong type.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let file = File::with_name(&config_path.as_ref().to_string_lossy()).required(false);
        Self::layered(file)
    }

    /// Loads configuration from `COALESCE_CONFIG`, or `config/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(&config_path)
    }

    /// Parses TOML text with the same env overrides as [`from_file`](Self::from_file).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] on malformed TOML or mistyped values.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::layered(File::from_str(toml, FileFormat::Toml))
    }

    fn layered<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validates all configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero port or body limit or an
    /// unknown logging format, and [`ConfigError::Dedup`] for invalid
    /// coordinator settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_port == 0 {
            return Err(ConfigError::Invalid {
                field: "server.bind_port",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "server.max_body_bytes",
                reason: "must be greater than 0".to_string(),
            });
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Invalid {
                field: "logging.format",
                reason: format!("expected 'json' or 'pretty', got '{}'", self.logging.format),
            });
        }

        self.dedup.validate()?;

        Ok(())
    }

    /// Combines `server.bind_address` and `server.bind_port`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if they do not form a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port).parse().map_err(|_| {
            ConfigError::Invalid {
                field: "server.bind_address",
                reason: format!(
                    "not a socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                ),
            }
        })
    }
}
