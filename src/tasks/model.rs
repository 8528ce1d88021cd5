//! Task records and their lifecycle
//!
//! A [`TaskRecord`] moves `pending -> running -> {ready | error}` (or
//! straight from `pending` to `error`). All terminal data is applied in
//! one [`TaskRecord::apply`] call, so `result` and `error_detail` can
//! never coexist and never appear before the record is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque task identifier (UUIDv7, time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn generate() -> Self {
        TaskId(Uuid::now_v7())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(TaskId)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        TaskId(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Turnstile,
    Hcaptcha,
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChallengeKind::Turnstile => "turnstile",
            ChallengeKind::Hcaptcha => "hcaptcha",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnstileInput {
    pub url: String,
    pub sitekey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagedata: Option<String>,
    /// Per-task anonymous proxy, e.g. `socks5://host:port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HcaptchaInput {
    /// Base64 images in row-major grid order; `data:` URLs accepted
    pub images: Vec<String>,
    pub instructions: String,
    #[serde(default = "default_grid_side")]
    pub rows: u32,
    #[serde(default = "default_grid_side")]
    pub columns: u32,
}

fn default_grid_side() -> u32 {
    3
}

impl HcaptchaInput {
    pub fn cell_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChallengeInput {
    Turnstile(TurnstileInput),
    Hcaptcha(HcaptchaInput),
}

impl ChallengeInput {
    pub fn kind(&self) -> ChallengeKind {
        match self {
            ChallengeInput::Turnstile(_) => ChallengeKind::Turnstile,
            ChallengeInput::Hcaptcha(_) => ChallengeKind::Hcaptcha,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Ready,
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Error)
    }
}

/// Successful solve payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Solution {
    /// Turnstile response token
    Token(String),
    /// Zero-indexed, sorted, distinct grid cells
    Tiles(Vec<u32>),
}

/// Machine-readable failure category carried next to `error_detail`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ProviderFailure,
    WorkerUnavailable,
    SessionFailure,
    /// The page could not be loaded; the browser itself is fine
    NavigationFailure,
    Cancelled,
    /// The process stopped before the task finished
    Interrupted,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Ready(Solution),
    Failed { kind: FailureKind, detail: String },
}

impl TaskOutcome {
    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            kind,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A worker claimed the task
    Start,
    Finish(TaskOutcome),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("task is already {0:?}")]
    AlreadyTerminal(TaskState),
    #[error("cannot start a task in state {0:?}")]
    NotPending(TaskState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    id: TaskId,
    kind: ChallengeKind,
    state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input: Option<ChallengeInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Solution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(input: ChallengeInput, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::generate(),
            kind: input.kind(),
            state: TaskState::Pending,
            input: Some(input),
            result: None,
            error_kind: None,
            error_detail: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a lifecycle transition. Terminal records reject everything.
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.state));
        }

        match transition {
            Transition::Start => {
                if self.state != TaskState::Pending {
                    return Err(TransitionError::NotPending(self.state));
                }
                self.state = TaskState::Running;
                self.started_at = Some(now);
            }
            Transition::Finish(outcome) => {
                match outcome {
                    TaskOutcome::Ready(solution) => {
                        self.state = TaskState::Ready;
                        self.result = Some(solution);
                    }
                    TaskOutcome::Failed { kind, detail } => {
                        self.state = TaskState::Error;
                        self.error_kind = Some(kind);
                        self.error_detail = Some(detail);
                    }
                }
                self.completed_at = Some(now);
                self.input = None;
            }
        }

        Ok(())
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> ChallengeKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn input(&self) -> Option<&ChallengeInput> {
        self.input.as_ref()
    }

    pub fn result(&self) -> Option<&Solution> {
        self.result.as_ref()
    }

    pub fn error_kind(&self) -> Option<FailureKind> {
        self.error_kind
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Seconds since creation, frozen at completion
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        let end = self.completed_at.unwrap_or(now);
        let micros = (end - self.created_at).num_microseconds().unwrap_or(i64::MAX).max(0);
        micros as f64 / 1_000_000.0
    }
}
