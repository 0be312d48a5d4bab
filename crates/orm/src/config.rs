//! ORM configuration
//!
//! Plain configuration structs with defaults, overridable from the
//! environment.

use std::env;
use std::time::Duration;

use crate::error::{ModelError, OrmResult};

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
    pub idle_timeout: Option<u64>,
    pub max_lifetime: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: 30,
            idle_timeout: Some(600),  // 10 minutes
            max_lifetime: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

/// ORM configuration
#[derive(Debug, Clone)]
pub struct OrmConfig {
    /// `postgres://...` or `sqlite://...` / `sqlite::memory:`
    pub database_url: String,
    pub pool: PoolConfig,
    /// Largest id list put in one `IN (...)` clause
    pub in_max: usize,
    /// Reject writes on rows written less than this long ago
    pub concurrency_window: Option<Duration>,
    pub default_language: String,
    /// Default for models that do not say otherwise
    pub log_access: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            pool: PoolConfig::default(),
            in_max: 1000,
            concurrency_window: None,
            default_language: "en_US".to_string(),
            log_access: true,
        }
    }
}

impl OrmConfig {
    /// Configuration for the given database URL, defaults elsewhere
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> OrmResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(in_max) = env::var("OERP_IN_MAX") {
            config.in_max = in_max.parse().map_err(|_| {
                ModelError::Configuration(format!(
                    "Invalid value for OERP_IN_MAX: '{}', expected a positive integer",
                    in_max
                ))
            })?;
        }

        if let Ok(window) = env::var("OERP_CONCURRENCY_WINDOW") {
            let seconds: u64 = window.parse().map_err(|_| {
                ModelError::Configuration(format!(
                    "Invalid value for OERP_CONCURRENCY_WINDOW: '{}', expected seconds",
                    window
                ))
            })?;
            config.concurrency_window = Some(Duration::from_secs(seconds));
        }

        if let Ok(lang) = env::var("OERP_DEFAULT_LANG") {
            config.default_language = lang;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> OrmResult<()> {
        if self.in_max == 0 {
            return Err(ModelError::Configuration(
                "in_max must be greater than zero".to_string(),
            ));
        }
        if self.database_url.is_empty() {
            return Err(ModelError::Configuration(
                "database_url is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_concurrency_window(mut self, window: Duration) -> Self {
        self.concurrency_window = Some(window);
        self
    }

    pub fn with_in_max(mut self, in_max: usize) -> Self {
        self.in_max = in_max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrmConfig::default();
        assert_eq!(config.in_max, 1000);
        assert_eq!(config.default_language, "en_US");
        assert!(config.concurrency_window.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_in_max_is_rejected() {
        let config = OrmConfig::new("sqlite::memory:").with_in_max(0);
        assert!(matches!(config.validate(), Err(ModelError::Configuration(_))));
    }
}
