use serde::{Deserialize, Serialize};

use super::run::RunLimits;

/// Main configuration structure for QAgent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Maximum number of runs executing at once (1-64)
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Iteration budget for runs that do not set their own
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,

    /// Upper bound accepted for a run's own iteration budget
    #[serde(default = "default_max_iterations_limit")]
    pub max_iterations_limit: u32,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics reporting configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

const fn default_max_concurrent_runs() -> usize {
    2
}

const fn default_max_iterations() -> u32 {
    3
}

const fn default_max_iterations_limit() -> u32 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            default_max_iterations: default_max_iterations(),
            max_iterations_limit: default_max_iterations_limit(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub const fn run_limits(&self) -> RunLimits {
        RunLimits {
            default_max_iterations: self.default_max_iterations,
            max_iterations_limit: self.max_iterations_limit,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".qagent/qagent.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricsConfig {
    /// Scope reported when none is given
    #[serde(default = "default_scope")]
    pub default_scope: String,

    /// Days covered by a trend when none is given
    #[serde(default = "default_trend_days")]
    pub trend_days: u32,
}

fn default_scope() -> String {
    super::metrics::GLOBAL_SCOPE.to_string()
}

const fn default_trend_days() -> u32 {
    7
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            default_scope: default_scope(),
            trend_days: default_trend_days(),
        }
    }
}
