//! Request and response bodies of the HTTP API
//!
//! - `GET /turnstile` takes [`TurnstileQuery`], `POST /hcaptcha` takes an
//!   [`HcaptchaInput`](crate::tasks::HcaptchaInput) JSON body; both answer
//!   `202` with [`TaskAccepted`]
//! - `GET /results` and `GET /resolved` answer with [`PollResponse`]
//!
//! A poll body looks like:
//!
//! ```json
//! { "status": "ready", "solution": [0, 4, 7], "elapsed_time": 3.412 }
//! ```

use serde::{Deserialize, Serialize};

use crate::observability::MetricsSnapshot;
use crate::pool::PoolStatus;
use crate::tasks::{FailureKind, Solution, TaskCounts, TaskRecord, TaskState};

#[derive(Debug, Default, Deserialize)]
pub struct TurnstileQuery {
    pub url: Option<String>,
    pub sitekey: Option<String>,
    pub action: Option<String>,
    pub cdata: Option<String>,
    pub pagedata: Option<String>,
    pub proxy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskAccepted {
    pub task_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    NotReady,
    Ready,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollResponse {
    pub status: PollStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<Solution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    /// Seconds since submission, frozen once the task is terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<f64>,
}

impl PollResponse {
    pub fn from_record(record: &TaskRecord, now: chrono::DateTime<chrono::Utc>) -> Self {
        let status = match record.state() {
            TaskState::Pending | TaskState::Running => PollStatus::NotReady,
            TaskState::Ready => PollStatus::Ready,
            TaskState::Error => PollStatus::Error,
        };

        Self {
            status,
            solution: record.result().cloned(),
            error: record.error_detail().map(str::to_string),
            error_kind: record.error_kind(),
            elapsed_time: Some(record.elapsed_secs(now)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CancelResponse {
    pub task_id: String,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub browser_pool_size: usize,
    pub idle_workers: usize,
    pub active_tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub pool: PoolStatus,
    pub tasks: TaskCounts,
    pub providers: Vec<String>,
    pub metrics: MetricsSnapshot,
}
