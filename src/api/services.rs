use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::debug;

use super::{
    models::{
        CancelResponse, HealthResponse, PollResponse, StatusResponse, TaskAccepted, TaskQuery,
        TurnstileQuery,
    },
    state::AppState,
    validation::{self, QueryValidationError},
};
use crate::api::error::ApiError;
use crate::tasks::{ChallengeInput, ChallengeKind, HcaptchaInput, TaskId, TaskState};

impl From<QueryValidationError> for ApiError {
    fn from(err: QueryValidationError) -> Self {
        match err {
            // An id that was never issued is unknown, not malformed input
            QueryValidationError::MalformedId(raw) => ApiError::NotFound(raw),
            other => ApiError::InvalidInput(other.to_string()),
        }
    }
}

/// Turnstile submission (GET /turnstile?url=&sitekey=[&action=&cdata=&pagedata=&proxy=])
///
/// Answers 202 with the task id as soon as the task is stored; the solve
/// runs in the background.
pub async fn submit_turnstile(
    State(state): State<AppState>,
    Query(query): Query<TurnstileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let input = validation::turnstile_input(query)?;
    let task_id = state.dispatcher.submit(ChallengeInput::Turnstile(input))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id: task_id.to_string(),
        }),
    ))
}

/// hCaptcha grid submission (POST /hcaptcha)
///
/// Body: `{"images": [...], "instructions": "...", "rows": 3, "columns": 3}`.
/// Grids no configured provider can take are rejected here with 400.
pub async fn submit_hcaptcha(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidInput("missing Content-Type header".into()))?;
    super::utils::parse_content_type(content_type)?;

    let max_body = state.config.server.max_body_bytes.as_u64() as usize;
    let body_bytes = super::utils::read_body(body, max_body).await?;

    let input: HcaptchaInput = serde_json::from_slice(&body_bytes)?;
    let task_id = state.dispatcher.submit(ChallengeInput::Hcaptcha(input))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id: task_id.to_string(),
        }),
    ))
}

/// Turnstile poll (GET /results?id=)
pub async fn turnstile_result(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<impl IntoResponse, ApiError> {
    poll(&state, query, ChallengeKind::Turnstile)
}

/// hCaptcha poll (GET /resolved?id=)
pub async fn hcaptcha_result(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<impl IntoResponse, ApiError> {
    poll(&state, query, ChallengeKind::Hcaptcha)
}

/// Read-only view of a task. 202 while live, 200 once terminal, whether
/// it succeeded or failed.
fn poll(state: &AppState, query: TaskQuery, kind: ChallengeKind) -> Result<(StatusCode, Json<PollResponse>), ApiError> {
    let id = validation::task_id(query)?;
    let record = state
        .store
        .get(&id)?
        .filter(|record| record.kind() == kind)
        .ok_or_else(|| ApiError::NotFound(id.to_string()))?;

    let status = match record.state() {
        TaskState::Pending | TaskState::Running => StatusCode::ACCEPTED,
        TaskState::Ready | TaskState::Error => StatusCode::OK,
    };
    debug!(task_id = %id, state = ?record.state(), "Task polled");

    Ok((status, Json(PollResponse::from_record(&record, Utc::now()))))
}

/// Cancel a live task (POST /cancel?id=)
pub async fn cancel_task(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let id: TaskId = validation::task_id(query)?;
    let cancelled = state.dispatcher.cancel(&id)?;

    Ok(Json(CancelResponse {
        task_id: id.to_string(),
        cancelled,
    }))
}

/// Liveness (GET /health)
pub async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let counts = state.store.counts()?;
    let pool = state.pool.status();

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        browser_pool_size: pool.size,
        idle_workers: pool.idle,
        active_tasks: counts.active(),
    }))
}

/// Operator view (GET /status): pool, task counts and metrics
pub async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        pool: state.pool.status(),
        tasks: state.store.counts()?,
        providers: state.providers.as_ref().clone(),
        metrics: state.metrics.snapshot(),
    }))
}
