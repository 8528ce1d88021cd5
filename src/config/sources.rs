use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "SOLVEBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/solvebox.toml";
const ENV_PREFIX: &str = "SOLVEBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(path_override: Option<PathBuf>) -> Result<Config, ConfigError> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    let config_path = path_override.unwrap_or_else(|| {
        env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    });

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);

    Ok(config)
}

/// Resolve provider API keys from the environment variables they name.
/// Keys never live in TOML files.
pub fn load_secrets(config: &mut Config) {
    for provider in &mut config.providers {
        match env::var(&provider.api_key_env) {
            Ok(key) if !key.is_empty() => provider.api_key = Some(key),
            _ => {
                tracing::warn!(
                    provider = %provider.name,
                    env = %provider.api_key_env,
                    "API key not set, provider will be skipped"
                );
            }
        }
    }
}

/// Load configuration from a specific path and the process environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // SOLVEBOX__POOL__THREADS -> pool.threads
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
