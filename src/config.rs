//! Gateway configuration.
//!
//! Loaded once at startup and never mutated at runtime. Sources, in order
//! of precedence: `GATEWAY__SECTION__KEY` environment variables, an
//! optional `gateway.toml`, built-in defaults.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

use crate::sync::BackoffConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub namespaces: NamespacesConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Connection to the external configuration store.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store URL including credentials and database index,
    /// e.g. `redis://:secret@config.internal:6379/2`.
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
}

impl StoreConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_ms: self.reconnect_base_ms,
            max_ms: self.reconnect_max_ms,
            max_attempts: self.reconnect_max_attempts,
        }
    }
}

/// Key prefixes of the two managed namespaces.
#[derive(Debug, Clone, Deserialize)]
pub struct NamespacesConfig {
    #[serde(default = "default_auth_prefix")]
    pub auth_prefix: String,
    #[serde(default = "default_model_prefix")]
    pub model_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Upstream request timeout; generous, generations can run long.
    #[serde(default = "default_dispatch_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
        }
    }
}

impl Default for NamespacesConfig {
    fn default() -> Self {
        Self {
            auth_prefix: default_auth_prefix(),
            model_prefix: default_model_prefix(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_dispatch_timeout(),
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

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_store_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}
fn default_reconnect_base_ms() -> u64 {
    200
}
fn default_reconnect_max_ms() -> u64 {
    10_000
}
fn default_reconnect_max_attempts() -> u32 {
    10
}
fn default_auth_prefix() -> String {
    "api_key:".to_string()
}
fn default_model_prefix() -> String {
    "model_table:".to_string()
}
fn default_dispatch_timeout() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("gateway").required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }
}
