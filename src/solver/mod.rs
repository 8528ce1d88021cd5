//! Challenge solving strategies
//!
//! Every challenge kind has one [`SolveStrategy`]: it validates input at
//! submission time and performs the solve on a checked-out worker.

pub mod hcaptcha;
pub mod images;
pub mod providers;
pub mod turnstile;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use hcaptcha::HcaptchaStrategy;
pub use providers::{ProviderChain, ProviderError, VisionProvider};
pub use turnstile::{TurnstileSettings, TurnstileStrategy};

use crate::browser::BrowserError;
use crate::pool::Worker;
use crate::tasks::{ChallengeInput, ChallengeKind, FailureKind, Solution};

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("no token appeared within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Provider(String),

    #[error("browser session failed: {0}")]
    Session(#[from] BrowserError),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("{0}")]
    Internal(String),
}

impl SolveError {
    /// Whether the worker's browser session must be discarded
    pub fn is_session_level(&self) -> bool {
        matches!(self, SolveError::Session(e) if e.is_fatal())
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SolveError::Timeout(_) => FailureKind::Timeout,
            SolveError::Provider(_) => FailureKind::ProviderFailure,
            SolveError::Session(_) => FailureKind::SessionFailure,
            SolveError::Navigation(_) => FailureKind::NavigationFailure,
            SolveError::InvalidInput(_) | SolveError::Internal(_) => FailureKind::Internal,
        }
    }
}

impl From<ProviderError> for SolveError {
    fn from(err: ProviderError) -> Self {
        SolveError::Provider(err.to_string())
    }
}

#[async_trait]
pub trait SolveStrategy: Send + Sync {
    fn kind(&self) -> ChallengeKind;

    /// Reject malformed or out-of-bounds input before a task exists
    fn validate(&self, input: &ChallengeInput) -> Result<(), SolveError>;

    async fn solve(&self, input: &ChallengeInput, worker: &mut Worker) -> Result<Solution, SolveError>;
}

/// Strategy registry keyed by challenge kind
#[derive(Default, Clone)]
pub struct SolverSet {
    strategies: HashMap<ChallengeKind, Arc<dyn SolveStrategy>>,
}

impl SolverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, strategy: Arc<dyn SolveStrategy>) -> Self {
        self.register(strategy);
        self
    }

    pub fn register(&mut self, strategy: Arc<dyn SolveStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: ChallengeKind) -> Option<Arc<dyn SolveStrategy>> {
        self.strategies.get(&kind).cloned()
    }
}
