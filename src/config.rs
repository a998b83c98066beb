//! Engine configuration
//!
//! Layered with figment, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. TOML file (when given)
//! 3. Environment variables prefixed `RBACD_` (`__` separates nested keys,
//!    e.g. `RBACD_DATABASE__PATH`)

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Default tracing filter, used when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            log_filter: "rbacd=info".to_string(),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; None = in-memory
    pub path: Option<String>,
    pub max_connections: u32,
    /// Upper bound on a single store operation, in milliseconds; 0 disables it
    pub operation_timeout_ms: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 10,
            operation_timeout_ms: Some(5_000),
        }
    }
}

impl DatabaseConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }
}

impl Config {
    fn base() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    /// Load configuration from an optional TOML file and the environment
    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Self::base();
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("RBACD_").split("__"))
            .extract()
    }

    /// Load configuration from a TOML string, ignoring the environment
    pub fn from_toml_str(toml: &str) -> Result<Self, figment::Error> {
        Self::base().merge(Toml::string(toml)).extract()
    }
}
