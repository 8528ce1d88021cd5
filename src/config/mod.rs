//! Configuration management for SolveBox
//!
//! Layered configuration loaded from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use solvebox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Overrides follow the pattern `SOLVEBOX__<section>__<key>`:
//! - `SOLVEBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `SOLVEBOX__POOL__THREADS=8`
//! - `SOLVEBOX__SOLVER__SOLVE_TIMEOUT=90s`
//!
//! Provider API keys are read from the variables named by each
//! provider's `api_key_env`.
//!
//! # Configuration File
//!
//! Loaded from `config/solvebox.toml` unless `SOLVEBOX_CONFIG` or the
//! `--config` flag points elsewhere.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, HumanDuration};
pub use models::{
    BrowserConfig, Config, PoolConfig, ProviderConfig, ProviderKind, ServerConfig,
    SolverConfig, StoreBackend, StoreConfig,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_override(None)
    }

    /// Same as [`Config::load`] but with an explicit file path taking
    /// precedence over `SOLVEBOX_CONFIG`.
    pub fn load_with_override(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = sources::load_from_sources(path)?;
        sources::load_secrets(&mut config);
        validation::validate(&config)?;
        Ok(config)
    }

    /// Providers that have an API key and can take part in the fallback chain
    pub fn usable_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.api_key.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[pool]
threads = 3
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.pool.threads, 3);
        assert_eq!(config.usable_providers().count(), 0);
    }

    #[test]
    fn test_validation_rejects_zero_threads() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[pool]\nthreads = 0\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::NoWorkers)
        ));
    }

    #[test]
    fn test_provider_without_key_is_not_usable() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[[providers]]
name = "openai"
kind = "openai"
endpoint = "https://api.openai.com/v1/chat/completions"
model = "gpt-4o"
api_key_env = "SOLVEBOX_TEST_KEY_THAT_IS_NEVER_SET"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.usable_providers().count(), 0);
    }
}
