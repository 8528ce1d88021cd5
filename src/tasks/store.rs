use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use super::model::{TaskId, TaskRecord, TaskState, Transition, TransitionError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task {0} already exists")]
    Duplicate(TaskId),

    #[error("task store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Result of a transition attempt against the store
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition applied; carries the updated record
    Applied(TaskRecord),
    /// The record exists but rejected the transition (e.g. already terminal)
    Rejected(TransitionError),
    NotFound,
}

impl TransitionResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionResult::Applied(_))
    }
}

/// Per-state task counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub ready: usize,
    pub error: usize,
}

impl TaskCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Running => self.running += 1,
            TaskState::Ready => self.ready += 1,
            TaskState::Error => self.error += 1,
        }
    }

    /// Tasks that have not reached a terminal state
    pub fn active(&self) -> usize {
        self.pending + self.running
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.ready + self.error
    }
}

/// Shared task registry
///
/// Implementations serialize mutations so that a transition reads and
/// writes a record as one unit; readers never observe a half-applied
/// transition.
pub trait TaskStore: Send + Sync {
    fn insert(&self, record: TaskRecord) -> Result<()>;

    fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>>;

    fn transition(&self, id: &TaskId, transition: Transition, now: DateTime<Utc>) -> Result<TransitionResult>;

    /// Remove terminal records completed at or before `cutoff`
    fn prune_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn counts(&self) -> Result<TaskCounts>;
}

/// In-memory store guarded by a single lock
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryStore {
    fn insert(&self, record: TaskRecord) -> Result<()> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::Poisoned)?;
        if tasks.contains_key(&record.id()) {
            return Err(StoreError::Duplicate(record.id()));
        }
        debug!(task_id = %record.id(), kind = %record.kind(), "Task inserted");
        tasks.insert(record.id(), record);
        Ok(())
    }

    fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>> {
        let tasks = self.tasks.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tasks.get(id).cloned())
    }

    fn transition(&self, id: &TaskId, transition: Transition, now: DateTime<Utc>) -> Result<TransitionResult> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::Poisoned)?;
        let Some(record) = tasks.get_mut(id) else {
            return Ok(TransitionResult::NotFound);
        };

        // Apply to a copy so a rejected transition leaves the stored record untouched
        let mut updated = record.clone();
        match updated.apply(transition, now) {
            Ok(()) => {
                *record = updated.clone();
                Ok(TransitionResult::Applied(updated))
            }
            Err(err) => Ok(TransitionResult::Rejected(err)),
        }
    }

    fn prune_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::Poisoned)?;
        let before = tasks.len();
        tasks.retain(|_, record| !is_expired(record, cutoff));
        Ok(before - tasks.len())
    }

    fn counts(&self) -> Result<TaskCounts> {
        let tasks = self.tasks.read().map_err(|_| StoreError::Poisoned)?;
        let mut counts = TaskCounts::default();
        for record in tasks.values() {
            counts.record(record.state());
        }
        Ok(counts)
    }
}

/// Live tasks are never expired; the solve timeout bounds their lifetime
pub(crate) fn is_expired(record: &TaskRecord, cutoff: DateTime<Utc>) -> bool {
    record.state().is_terminal()
        && record.completed_at().is_some_and(|completed| completed <= cutoff)
}
