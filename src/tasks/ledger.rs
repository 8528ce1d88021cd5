//! Fjall-backed task store
//!
//! Keeps task records on disk so results survive a restart. Records are
//! JSON values keyed by the 16 raw bytes of the task id. Mutations go
//! through one mutex; Fjall handles concurrent readers.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use tracing::{debug, info, warn};

use super::model::{FailureKind, TaskId, TaskOutcome, TaskRecord, Transition};
use super::store::{is_expired, Result, StoreError, TaskCounts, TaskStore, TransitionResult};

pub struct FjallStore {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    write_lock: Mutex<()>,
}

impl FjallStore {
    /// Open or create a store at `path`.
    ///
    /// Records left `pending`/`running` by a previous process can never
    /// complete, so they are failed as `interrupted` on open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall task store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;

        let store = Self {
            keyspace,
            tasks,
            write_lock: Mutex::new(()),
        };

        let interrupted = store.fail_interrupted(Utc::now())?;
        if interrupted > 0 {
            warn!(interrupted, "Failed tasks left unfinished by a previous run");
        }

        Ok(store)
    }

    fn read(&self, id: &TaskId) -> Result<Option<TaskRecord>> {
        match self.tasks.get(id.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn write(&self, record: &TaskRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        self.tasks.insert(record.id().as_bytes().to_vec(), value)?;
        Ok(())
    }

    fn records(&self) -> impl Iterator<Item = Result<TaskRecord>> + '_ {
        self.tasks.iter().map(|item| -> Result<TaskRecord> {
            let (_, value) = item?;
            Ok(serde_json::from_slice(&value)?)
        })
    }

    fn fail_interrupted(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut stale = Vec::new();
        for record in self.records() {
            let record = record?;
            if !record.state().is_terminal() {
                stale.push(record);
            }
        }

        for mut record in stale.iter().cloned() {
            let outcome = TaskOutcome::failed(
                FailureKind::Interrupted,
                "service restarted before the task finished",
            );
            if record.apply(Transition::Finish(outcome), now).is_ok() {
                self.write(&record)?;
            }
        }

        Ok(stale.len())
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

impl TaskStore for FjallStore {
    fn insert(&self, record: TaskRecord) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        if self.tasks.contains_key(record.id().as_bytes())? {
            return Err(StoreError::Duplicate(record.id()));
        }
        self.write(&record)?;
        debug!(task_id = %record.id(), kind = %record.kind(), "Task persisted");
        Ok(())
    }

    fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>> {
        self.read(id)
    }

    fn transition(&self, id: &TaskId, transition: Transition, now: DateTime<Utc>) -> Result<TransitionResult> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(mut record) = self.read(id)? else {
            return Ok(TransitionResult::NotFound);
        };

        match record.apply(transition, now) {
            Ok(()) => {
                self.write(&record)?;
                Ok(TransitionResult::Applied(record))
            }
            Err(err) => Ok(TransitionResult::Rejected(err)),
        }
    }

    fn prune_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut expired = Vec::new();
        for record in self.records() {
            let record = record?;
            if is_expired(&record, cutoff) {
                expired.push(record.id());
            }
        }

        for id in &expired {
            self.tasks.remove(id.as_bytes().to_vec())?;
        }

        Ok(expired.len())
    }

    fn counts(&self) -> Result<TaskCounts> {
        let mut counts = TaskCounts::default();
        for record in self.records() {
            counts.record(record?.state());
        }
        Ok(counts)
    }
}
