//! Configuration management
//!
//! Hierarchical configuration using figment: defaults, project YAML, local
//! overrides, then `QAGENT_` environment variables.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader, CONFIG_DIR};
