//! Configuration loading and validation.
//!
//! Configuration is loaded from a TOML file with environment variable
//! overrides for values that should not live in files (`SQLKV_PASSWORD`) or
//! that operators commonly switch per invocation (`SQLKV_STORE`).
//!
//! # Example
//!
//! ```no_run
//! use sqlkv::config::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("sqlkv.toml")?;
//!     config.logging.init();
//!     let store = config.open_store()?;
//!     store.put("greeting", b"hello")?;
//!     Ok(())
//! }
//! ```

mod database;
mod logging;
mod retry;

use std::path::Path;

use serde::Deserialize;

pub use database::DatabaseConfig;
pub use logging::LoggingConfig;
pub use retry::RetryConfig;

use crate::dialect::validate_store_name;
use crate::error::{ConfigError, Result};
use crate::store::Store;

/// Environment variable that replaces `database.password`.
pub const PASSWORD_ENV: &str = "SQLKV_PASSWORD";

/// Environment variable that replaces `store_name`.
pub const STORE_ENV: &str = "SQLKV_STORE";

/// Everything a store needs besides its name.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
}

impl StoreConfig {
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.database.validate()?;
        self.retry.validate()
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Store (table) name.
    #[serde(default = "default_store_name")]
    pub store_name: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_store_name() -> String {
    "kvstore".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_name: default_store_name(),
            database: DatabaseConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML content and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.database.password = Some(password);
        }
        if let Ok(store) = std::env::var(STORE_ENV) {
            if !store.is_empty() {
                config.store_name = store;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML is malformed, or
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        validate_store_name(&self.store_name)?;
        self.store_config().validate()
    }

    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            database: self.database.clone(),
            retry: self.retry.clone(),
        }
    }

    /// Open the configured store.
    ///
    /// # Errors
    ///
    /// See [`Store::open`].
    pub fn open_store(&self) -> Result<Store> {
        Store::open(&self.store_name, &self.store_config())
    }
}
