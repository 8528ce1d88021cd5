use super::models::Config;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("pool.threads must be at least 1")]
    NoWorkers,

    #[error("Duration must be positive: {field}")]
    ZeroDuration { field: String },

    #[error("Invalid WebDriver URL '{url}', expected http:// or https://")]
    InvalidWebDriverUrl { url: String },

    #[error("Provider at position {index} has an empty name")]
    UnnamedProvider { index: usize },

    #[error("Duplicate provider name '{name}'")]
    DuplicateProvider { name: String },

    #[error("Provider '{name}' has an invalid endpoint '{endpoint}'")]
    InvalidProviderEndpoint { name: String, endpoint: String },

    #[error("Provider '{name}' must accept at least one image")]
    ZeroProviderCapacity { name: String },

    #[error("solver.max_image_bytes and solver.max_image_dimension must be positive")]
    InvalidImageLimits,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_pool(config)?;
    validate_browser(config)?;
    validate_solver(config)?;
    validate_providers(config)?;
    validate_store(config)?;
    Ok(())
}

fn validate_pool(config: &Config) -> Result<(), ValidationError> {
    if config.pool.threads == 0 {
        return Err(ValidationError::NoWorkers);
    }

    if let Some(timeout) = config.pool.acquire_timeout {
        non_zero("pool.acquire_timeout", timeout.is_zero())?;
    }

    Ok(())
}

fn validate_browser(config: &Config) -> Result<(), ValidationError> {
    let url = &config.browser.webdriver_url;
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ValidationError::InvalidWebDriverUrl { url: url.clone() });
    }

    non_zero(
        "browser.page_load_timeout",
        config.browser.page_load_timeout.is_zero(),
    )
}

fn validate_solver(config: &Config) -> Result<(), ValidationError> {
    let solver = &config.solver;
    non_zero("solver.solve_timeout", solver.solve_timeout.is_zero())?;
    non_zero("solver.token_timeout", solver.token_timeout.is_zero())?;
    non_zero("solver.poll_interval", solver.poll_interval.is_zero())?;

    if solver.max_image_bytes.as_u64() == 0 || solver.max_image_dimension == 0 {
        return Err(ValidationError::InvalidImageLimits);
    }

    Ok(())
}

/// Provider names must be unique so metrics and logs stay unambiguous
fn validate_providers(config: &Config) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();

    for (index, provider) in config.providers.iter().enumerate() {
        if provider.name.trim().is_empty() {
            return Err(ValidationError::UnnamedProvider { index });
        }

        if !seen.insert(provider.name.as_str()) {
            return Err(ValidationError::DuplicateProvider {
                name: provider.name.clone(),
            });
        }

        if reqwest::Url::parse(&provider.endpoint).is_err() {
            return Err(ValidationError::InvalidProviderEndpoint {
                name: provider.name.clone(),
                endpoint: provider.endpoint.clone(),
            });
        }

        if provider.max_images == 0 || provider.max_request_bytes.as_u64() == 0 {
            return Err(ValidationError::ZeroProviderCapacity {
                name: provider.name.clone(),
            });
        }

        non_zero(
            &format!("providers.{}.timeout", provider.name),
            provider.timeout.is_zero(),
        )?;
    }

    Ok(())
}

fn validate_store(config: &Config) -> Result<(), ValidationError> {
    non_zero("store.retention", config.store.retention.is_zero())?;
    non_zero("store.prune_interval", config.store.prune_interval.is_zero())
}

fn non_zero(field: &str, is_zero: bool) -> Result<(), ValidationError> {
    if is_zero {
        return Err(ValidationError::ZeroDuration {
            field: field.to_string(),
        });
    }
    Ok(())
}
