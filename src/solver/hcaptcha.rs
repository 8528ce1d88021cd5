//! hCaptcha image grids, classified by vision providers

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::images::{self, ImageLimits, PreparedImage};
use super::providers::{GridRequest, ProviderChain};
use super::{SolveError, SolveStrategy};
use crate::config::SolverConfig;
use crate::pool::Worker;
use crate::tasks::{ChallengeInput, ChallengeKind, HcaptchaInput, Solution};

impl From<&SolverConfig> for ImageLimits {
    fn from(config: &SolverConfig) -> Self {
        Self {
            max_bytes: config.max_image_bytes.as_u64(),
            max_dimension: config.max_image_dimension,
        }
    }
}

pub struct HcaptchaStrategy {
    chain: Arc<ProviderChain>,
    limits: ImageLimits,
}

impl HcaptchaStrategy {
    pub fn new(chain: Arc<ProviderChain>, limits: ImageLimits) -> Self {
        Self { chain, limits }
    }

    /// Validate the grid and decode its images
    fn prepare(&self, input: &HcaptchaInput) -> Result<GridRequest, SolveError> {
        if input.instructions.trim().is_empty() {
            return Err(SolveError::InvalidInput("instructions must not be empty".into()));
        }
        if input.rows == 0 || input.columns == 0 {
            return Err(SolveError::InvalidInput(
                "rows and columns must both be at least 1".into(),
            ));
        }
        if input.images.len() != input.cell_count() {
            return Err(SolveError::InvalidInput(format!(
                "{} images do not fill a {}x{} grid ({} expected)",
                input.images.len(),
                input.rows,
                input.columns,
                input.cell_count()
            )));
        }

        let images = input
            .images
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                images::prepare(raw, self.limits)
                    .map_err(|e| SolveError::InvalidInput(format!("image {index}: {e}")))
            })
            .collect::<Result<Vec<PreparedImage>, _>>()?;

        let request = GridRequest {
            instructions: input.instructions.trim().to_string(),
            rows: input.rows,
            columns: input.columns,
            images,
        };

        if self.chain.is_empty() {
            return Err(SolveError::InvalidInput(
                "no vision providers are configured".into(),
            ));
        }
        if !self.chain.accepts(request.images.len(), request.total_bytes()) {
            return Err(SolveError::InvalidInput(format!(
                "{} images ({} bytes) exceed the capacity of every configured provider",
                request.images.len(),
                request.total_bytes()
            )));
        }

        Ok(request)
    }
}

fn hcaptcha_input(input: &ChallengeInput) -> Result<&HcaptchaInput, SolveError> {
    match input {
        ChallengeInput::Hcaptcha(hcaptcha) => Ok(hcaptcha),
        other => Err(SolveError::InvalidInput(format!(
            "expected an hcaptcha challenge, got {}",
            other.kind()
        ))),
    }
}

#[async_trait]
impl SolveStrategy for HcaptchaStrategy {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Hcaptcha
    }

    fn validate(&self, input: &ChallengeInput) -> Result<(), SolveError> {
        self.prepare(hcaptcha_input(input)?).map(|_| ())
    }

    async fn solve(&self, input: &ChallengeInput, worker: &mut Worker) -> Result<Solution, SolveError> {
        let request = self.prepare(hcaptcha_input(input)?)?;
        debug!(
            worker_id = worker.id(),
            images = request.images.len(),
            instructions = %request.instructions,
            "Classifying grid"
        );

        let tiles = self.chain.solve(&request).await?;
        Ok(Solution::Tiles(tiles))
    }
}
