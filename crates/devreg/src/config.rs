//! Configuration file parsing and structures.
//!
//! devreg reads one TOML file at startup. The resulting [`Config`] is built
//! once and handed to each component that needs a piece of it.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

use crate::sync::RollbackPolicy;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub broker: BrokerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"devreg::sync" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

/// HTTP API configuration
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Answer cross-origin requests from any origin
    #[serde(default = "default_true")]
    pub cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_api_port(),
            cors: true,
        }
    }
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

/// Device store configuration
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// JSON document file; the store is memory-only when unset
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Deadline applied to every store call
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "devreg".to_string()
}

fn default_exchange() -> String {
    "configs_direct".to_string()
}

/// Message broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker hostname or IP address
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Routing root every device config is published under
    #[serde(default = "default_exchange")]
    pub exchange: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Mounted secret holding the password
    #[serde(default)]
    pub password_file: Option<PathBuf>,

    /// Keep the last config per device on the broker
    #[serde(default = "default_true")]
    pub retain: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_broker_port(),
            client_id: default_client_id(),
            exchange: default_exchange(),
            username: None,
            password: None,
            password_file: None,
            retain: true,
        }
    }
}

fn default_confirm_timeout_ms() -> u64 {
    8_000
}

/// Config sync configuration
#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    /// How long to wait for the broker to confirm a published config
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,

    #[serde(default)]
    pub rollback: RollbackPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            confirm_timeout_ms: default_confirm_timeout_ms(),
            rollback: RollbackPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file, resolving secret files
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let mut config = Self::from_toml(&contents)?;
        config.broker.resolve_secrets()?;
        Ok(config)
    }

    /// Parse and validate configuration without touching the filesystem
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.is_empty() {
            return Err(ConfigError::Invalid("broker.host must not be empty".to_string()));
        }
        if self.broker.password.is_some() && self.broker.password_file.is_some() {
            return Err(ConfigError::Invalid(
                "broker.password and broker.password_file are mutually exclusive".to_string(),
            ));
        }
        if self.sync.confirm_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync.confirm_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store.query_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl BrokerConfig {
    /// Replace `password_file` with the password it holds
    pub fn resolve_secrets(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = self.password_file.take() {
            self.password = Some(read_secret(&path)?);
        }
        Ok(())
    }
}

/// Read a mounted secret: the first whitespace-separated token of the file
fn read_secret(path: &Path) -> Result<String, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

    contents
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::Invalid(format!("secret file {} is empty", path.display())))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
