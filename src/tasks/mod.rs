//! Task registry: records, lifecycle transitions and retention
//!
//! - [`MemoryStore`]: default, process-local map behind one lock
//! - [`FjallStore`]: durable variant for deployments that want results to
//!   survive restarts
//!
//! Terminal tasks are evicted by [`spawn_pruner`] once they have been
//! complete for longer than `store.retention`. Polling never evicts.

pub mod ledger;
pub mod model;
pub mod pruning;
pub mod store;

use std::sync::Arc;

pub use ledger::FjallStore;
pub use model::{
    ChallengeInput, ChallengeKind, FailureKind, HcaptchaInput, Solution, TaskId, TaskOutcome,
    TaskRecord, TaskState, Transition, TransitionError, TurnstileInput,
};
pub use pruning::{prune_once, spawn_pruner};
pub use store::{MemoryStore, StoreError, TaskCounts, TaskStore, TransitionResult};

use crate::config::{StoreBackend, StoreConfig};

/// Build the store selected by configuration
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn TaskStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Fjall => Ok(Arc::new(FjallStore::open(&config.path)?)),
    }
}
