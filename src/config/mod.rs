//! # Conduit Configuration
//!
//! Typed configuration for every component, loaded from `conduit-config.yaml`.
//!
//! ## Architecture
//!
//! - **One file, one struct**: [`ConduitConfig`] mirrors the YAML layout section by section
//! - **Environment Awareness**: `development`/`test`/`production` blocks override the base values
//! - **Defaults everywhere**: a missing section or key falls back to the component default
//! - **Explicit Validation**: every section validates itself before the config is handed out
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conduit_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//!
//! let window = manager.config().rate_limiter.window();
//! let max_concurrent = manager.config().queue_processor.max_concurrent;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::batch::BatchConfig;
use crate::database::TransactionConfig;
use crate::queue::QueueProcessorConfig;
use crate::resilience::{RateLimiterConfig, RetryStrategyConfig};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    pub rate_limiter: RateLimiterConfig,
    pub queue_processor: QueueProcessorConfig,
    pub retry: RetryStrategyConfig,
    pub transaction: TransactionConfig,
    pub batch: BatchConfig,
    pub database: DatabaseConfig,
}

impl ConduitConfig {
    /// Validate every section, reporting the first failure
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.rate_limiter
            .validate()
            .map_err(|e| ConfigurationError::validation_error("rate_limiter", e))?;
        self.queue_processor
            .validate()
            .map_err(|e| ConfigurationError::validation_error("queue_processor", e))?;
        self.retry
            .validate()
            .map_err(|e| ConfigurationError::validation_error("retry", e))?;
        self.transaction.validate()?;
        self.batch.validate()?;
        self.database.validate()?;
        Ok(())
    }
}

/// Checkpoint database connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL; `${DATABASE_URL}` reads the environment variable
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Database name override; otherwise derived from the environment
    pub database: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: String::new(),
            database: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn database_name(&self, environment: &str) -> String {
        match &self.database {
            Some(name) => name.clone(),
            None => format!("conduit_{environment}"),
        }
    }

    /// Build the connection URL, preferring an explicit `url`
    pub fn database_url(&self, environment: &str) -> String {
        if let Some(url) = &self.url {
            if url == "${DATABASE_URL}" {
                if let Ok(env_url) = std::env::var("DATABASE_URL") {
                    return env_url;
                }
            } else if !url.is_empty() {
                return url.clone();
            }
        }

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username,
            self.password,
            self.host,
            self.port,
            self.database_name(environment)
        )
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.url.is_none() && self.host.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "database.host",
                "",
                "host is required when no url is configured",
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }
        Ok(())
    }
}
