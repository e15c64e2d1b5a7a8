//! Configuration management for BCDB
//!
//! Settings come from a TOML file or from `BCDB_<SECTION>_<KEY>`
//! environment variables layered over the defaults. Every loader
//! validates before returning.

use crate::logging::LogLevel;
use crate::query::{DEFAULT_BATCH_SIZE, DEFAULT_STREAM_BUFFER};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// gRPC server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,

    /// Grace period for in-flight calls on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(ConfigError::invalid(
                "store.backend",
                format!("unknown backend '{}'", other),
            )),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Memory => f.write_str("memory"),
            StorageBackend::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// Record and ACL storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StorageBackend,

    /// Database file, used by the sqlite backend
    pub sqlite_path: PathBuf,

    /// Maximum pooled sqlite connections
    pub pool_size: u32,

    /// Records fetched per step of a List/Find sweep
    pub scan_batch_size: usize,

    /// Results buffered ahead of a slow stream consumer
    pub stream_buffer: usize,
}

/// Caller authentication
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// User that bypasses every ACL check
    pub owner: Option<String>,

    /// User name to argon2 PHC hash of the user's API key
    pub users: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub json_format: bool,
    pub with_target: bool,
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 50051)),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            sqlite_path: PathBuf::from("./data/bcdb.db"),
            pool_size: 8,
            scan_batch_size: DEFAULT_BATCH_SIZE,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

fn env_parse<T>(key: &'static str, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, e)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern `BCDB_<SECTION>_<KEY>`, for example
    /// `BCDB_SERVER_BIND_ADDRESS=0.0.0.0:50051`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = env_parse("server.bind_address", "BCDB_SERVER_BIND_ADDRESS")? {
            config.server.bind_address = addr;
        }
        if let Ok(timeout) = env::var("BCDB_SERVER_SHUTDOWN_TIMEOUT") {
            config.server.shutdown_timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| ConfigError::invalid("server.shutdown_timeout", e))?;
        }

        if let Some(backend) = env_parse("store.backend", "BCDB_STORE_BACKEND")? {
            config.store.backend = backend;
        }
        if let Ok(path) = env::var("BCDB_STORE_SQLITE_PATH") {
            config.store.sqlite_path = PathBuf::from(path);
        }
        if let Some(size) = env_parse("store.pool_size", "BCDB_STORE_POOL_SIZE")? {
            config.store.pool_size = size;
        }
        if let Some(size) = env_parse("store.scan_batch_size", "BCDB_STORE_SCAN_BATCH_SIZE")? {
            config.store.scan_batch_size = size;
        }

        if let Ok(owner) = env::var("BCDB_AUTH_OWNER") {
            config.auth.owner = Some(owner);
        }

        if let Some(level) = env_parse("logging.level", "BCDB_LOG_LEVEL")? {
            config.logging.level = level;
        }
        if let Some(json) = env_parse("logging.json_format", "BCDB_LOG_JSON")? {
            config.logging.json_format = json;
        }

        if let Some(enabled) = env_parse("metrics.enabled", "BCDB_METRICS_ENABLED")? {
            config.metrics.enabled = enabled;
        }
        if let Some(addr) = env_parse("metrics.bind_address", "BCDB_METRICS_BIND_ADDRESS")? {
            config.metrics.bind_address = addr;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == StorageBackend::Sqlite {
            if self.store.pool_size == 0 {
                return Err(ConfigError::ValidationFailed(
                    "store.pool_size must be greater than 0".to_string(),
                ));
            }
            if self.store.sqlite_path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "store.sqlite_path is required for the sqlite backend".to_string(),
                ));
            }
        }

        if self.store.scan_batch_size == 0 || self.store.stream_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "store.scan_batch_size and store.stream_buffer must be greater than 0".to_string(),
            ));
        }

        for (user, hash) in &self.auth.users {
            if user.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "auth.users contains an empty user name".to_string(),
                ));
            }
            if !hash.starts_with("$argon2") {
                return Err(ConfigError::ValidationFailed(format!(
                    "auth.users.{} is not an argon2 hash",
                    user
                )));
            }
        }

        if let Some(owner) = &self.auth.owner {
            if !self.auth.users.contains_key(owner) {
                return Err(ConfigError::ValidationFailed(format!(
                    "auth.owner '{}' has no configured key",
                    owner
                )));
            }
        }

        if self.metrics.enabled && self.metrics.bind_address == self.server.bind_address {
            return Err(ConfigError::ValidationFailed(
                "metrics.bind_address must differ from server.bind_address".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWrite {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }
}
