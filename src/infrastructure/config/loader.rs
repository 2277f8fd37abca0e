use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::{Config, MAX_TREND_DAYS};

/// Project-local directory holding configuration and the database.
pub const CONFIG_DIR: &str = ".qagent";

const MAX_CONCURRENT_RUNS: usize = 64;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_runs: {0}. Must be between 1 and {MAX_CONCURRENT_RUNS}")]
    InvalidMaxConcurrentRuns(usize),

    #[error("Invalid max_iterations: default {default} must be between 1 and the limit {limit}")]
    InvalidMaxIterations { default: u32, limit: u32 },

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid trend_days: {0}. Must be between 1 and {MAX_TREND_DAYS}")]
    InvalidTrendDays(u32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.qagent/config.yaml` (created by `qagent init`)
    /// 3. `.qagent/local.yaml` (optional overrides)
    /// 4. `QAGENT_*` environment variables, `__` separating nested keys
    pub fn load() -> Result<Config> {
        Self::load_from(Path::new("."))
    }

    /// Load configuration rooted at `project_root`.
    pub fn load_from(project_root: &Path) -> Result<Config> {
        let dir = project_root.join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("QAGENT_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Default configuration rendered as YAML, as written by `init`.
    pub fn default_yaml() -> Result<String> {
        serde_yaml::to_string(&Config::default()).context("Failed to render default configuration")
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_concurrent_runs == 0 || config.max_concurrent_runs > MAX_CONCURRENT_RUNS {
            return Err(ConfigError::InvalidMaxConcurrentRuns(config.max_concurrent_runs));
        }

        if config.default_max_iterations == 0
            || config.default_max_iterations > config.max_iterations_limit
        {
            return Err(ConfigError::InvalidMaxIterations {
                default: config.default_max_iterations,
                limit: config.max_iterations_limit,
            });
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.metrics.trend_days == 0 || config.metrics.trend_days > MAX_TREND_DAYS {
            return Err(ConfigError::InvalidTrendDays(config.metrics.trend_days));
        }

        if config.metrics.default_scope.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "metrics.default_scope cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
