//! Vision providers and ordered fallback
//!
//! Each provider sits behind [`VisionProvider`] and advertises its
//! [`ProviderCapacity`]. [`ProviderChain`] tries them in configured order,
//! skipping any that cannot take the grid, and stops at the first success.

pub mod gemini;
pub mod openai;
pub mod parse;
pub mod prompt;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use super::images::PreparedImage;
use crate::config::{ProviderConfig, ProviderKind};
use crate::observability::Metrics;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no configured provider can take {images} images / {bytes} bytes")]
    NoCapacity { images: usize, bytes: usize },

    #[error("all providers failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

impl ProviderError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(timeout)
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

/// One grid to classify
#[derive(Debug, Clone)]
pub struct GridRequest {
    pub instructions: String,
    pub rows: u32,
    pub columns: u32,
    pub images: Vec<PreparedImage>,
}

impl GridRequest {
    /// Decoded payload size across all images
    pub fn total_bytes(&self) -> usize {
        self.images.iter().map(|image| image.size).sum()
    }

    pub fn cell_count(&self) -> u32 {
        self.rows * self.columns
    }
}

/// Sort and deduplicate a provider's answer, rejecting cells outside the grid
pub fn checked_tiles(mut tiles: Vec<u32>, cells: u32) -> Result<Vec<u32>, ProviderError> {
    if let Some(&outside) = tiles.iter().find(|&&tile| tile >= cells) {
        return Err(ProviderError::Malformed(format!(
            "tile {outside} is outside a grid of {cells} cells"
        )));
    }
    tiles.sort_unstable();
    tiles.dedup();
    Ok(tiles)
}

/// Per-request limits a provider accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapacity {
    pub max_images: usize,
    pub max_request_bytes: u64,
}

impl ProviderCapacity {
    pub fn fits(&self, images: usize, bytes: usize) -> bool {
        images <= self.max_images && bytes as u64 <= self.max_request_bytes
    }
}

impl From<&ProviderConfig> for ProviderCapacity {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            max_images: config.max_images,
            max_request_bytes: config.max_request_bytes.as_u64(),
        }
    }
}

#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capacity(&self) -> ProviderCapacity;

    /// Ask the model which cells match; returns zero-indexed cells
    async fn select_tiles(&self, request: &GridRequest) -> Result<Vec<u32>, ProviderError>;
}

/// Build providers for every configured entry that has an API key
pub fn build_providers(configs: &[ProviderConfig]) -> Result<Vec<Arc<dyn VisionProvider>>, ProviderError> {
    let mut providers: Vec<Arc<dyn VisionProvider>> = Vec::new();

    for config in configs {
        let Some(api_key) = config.api_key.clone() else {
            warn!(provider = %config.name, env = %config.api_key_env, "Provider has no API key, skipping");
            continue;
        };
        let provider: Arc<dyn VisionProvider> = match config.kind {
            ProviderKind::Openai => Arc::new(OpenAiProvider::new(config, api_key)?),
            ProviderKind::Gemini => Arc::new(GeminiProvider::new(config, api_key)?),
        };
        providers.push(provider);
    }

    info!(
        providers = ?providers.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
        "Vision providers ready"
    );
    Ok(providers)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Http(e.to_string()))
}

/// Ordered providers with stop-on-first-success fallback
pub struct ProviderChain {
    providers: Vec<Arc<dyn VisionProvider>>,
    metrics: Arc<Metrics>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn VisionProvider>>, metrics: Arc<Metrics>) -> Self {
        Self { providers, metrics }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Whether any provider could take a grid of this shape
    pub fn accepts(&self, images: usize, bytes: usize) -> bool {
        self.providers
            .iter()
            .any(|provider| provider.capacity().fits(images, bytes))
    }

    pub async fn solve(&self, request: &GridRequest) -> Result<Vec<u32>, ProviderError> {
        let images = request.images.len();
        let bytes = request.total_bytes();
        let mut failures = Vec::new();

        let eligible: Vec<_> = self
            .providers
            .iter()
            .filter(|provider| {
                let fits = provider.capacity().fits(images, bytes);
                if !fits {
                    debug!(provider = provider.name(), images, bytes, "Grid exceeds provider capacity");
                }
                fits
            })
            .collect();

        if eligible.is_empty() {
            return Err(ProviderError::NoCapacity { images, bytes });
        }

        for (attempt, provider) in eligible.iter().enumerate() {
            if attempt > 0 {
                self.metrics.provider_fallback();
            }

            let started = Instant::now();
            let result = provider
                .select_tiles(request)
                .await
                .and_then(|tiles| checked_tiles(tiles, request.cell_count()));
            self.metrics
                .provider_call(provider.name(), result.is_ok(), started.elapsed());

            match result {
                Ok(tiles) => {
                    info!(provider = provider.name(), ?tiles, "Provider solved grid");
                    return Ok(tiles);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Provider failed");
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }

        Err(ProviderError::Exhausted(failures))
    }
}
