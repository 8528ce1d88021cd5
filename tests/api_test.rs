use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tower::ServiceExt; // for `oneshot`

use solvebox::api::models::{HealthResponse, PollResponse, PollStatus, TaskAccepted};
use solvebox::api::state::AppState;
use solvebox::browser::{BrowserError, BrowserLauncher, BrowserSession};
use solvebox::config::Config;
use solvebox::humanize::HumanDuration;
use solvebox::observability::Metrics;
use solvebox::pool::{PoolSettings, WorkerPool};
use solvebox::solver::providers::{GridRequest, ProviderCapacity};
use solvebox::solver::{ProviderError, VisionProvider};
use solvebox::tasks::{MemoryStore, Solution, TaskStore, prune_once};

const TOKEN: &str = "0.fake-turnstile-token-0123456789";

/// Browser whose widget publishes a token on the first poll
struct FakeSession;

#[async_trait]
impl BrowserSession for FakeSession {
    fn id(&self) -> &str {
        "fake"
    }

    async fn navigate(&mut self, _url: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn execute(&mut self, script: &str, _args: Vec<Value>) -> Result<Value, BrowserError> {
        if script.contains("turnstile.render") {
            Ok(Value::from("rendered"))
        } else {
            Ok(Value::from(TOKEN))
        }
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeLauncher {
    launches: AtomicUsize,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _proxy: Option<&str>) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession))
    }
}

/// Vision provider with a canned answer
struct FakeProvider {
    name: &'static str,
    reply: Result<Vec<u32>, &'static str>,
    max_images: usize,
    calls: AtomicUsize,
}

impl FakeProvider {
    fn ok(name: &'static str, tiles: Vec<u32>) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply: Ok(tiles),
            max_images: 16,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply: Err("rate limited"),
            max_images: 16,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl VisionProvider for FakeProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn capacity(&self) -> ProviderCapacity {
        ProviderCapacity {
            max_images: self.max_images,
            max_request_bytes: 20_000_000,
        }
    }

    async fn select_tiles(&self, _request: &GridRequest) -> Result<Vec<u32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().map_err(|body| ProviderError::Status {
            status: 429,
            body: body.to_string(),
        })
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.solver.poll_interval = HumanDuration::millis(10);
    config.solver.token_timeout = HumanDuration::secs(2);
    config.solver.solve_timeout = HumanDuration::secs(5);
    config
}

/// Builds a router over an in-memory store and fake workers
fn build_test_app(providers: Vec<Arc<dyn VisionProvider>>) -> (Router, AppState) {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());
    let pool = Arc::new(WorkerPool::new(
        2,
        Arc::new(FakeLauncher::default()),
        PoolSettings {
            acquire_timeout: None,
            recycle_after: 0,
        },
    ));

    let state = AppState::with_providers(test_config(), store, pool, providers, Arc::new(Metrics::new()));
    (solvebox::api::router(state.clone()), state)
}

fn png_base64(width: u32, height: u32) -> String {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    STANDARD.encode(bytes)
}

fn grid_body(rows: u32, columns: u32) -> Value {
    let count = (rows * columns) as usize;
    json!({
        "images": vec![png_base64(100, 100); count],
        "instructions": "Please click each image containing a bicycle",
        "rows": rows,
        "columns": columns,
    })
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

async fn post_json(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Polls until the task leaves the live states
async fn wait_terminal(app: &Router, path: &str, task_id: &str) -> (StatusCode, PollResponse) {
    for _ in 0..200 {
        let (status, body) = get(app, &format!("{path}?id={task_id}")).await;
        if status != StatusCode::ACCEPTED {
            return (status, serde_json::from_value(body).unwrap());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never finished");
}

#[tokio::test]
async fn test_health() {
    let (app, _) = build_test_app(vec![]);

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let health: HealthResponse = serde_json::from_value(body).unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.browser_pool_size, 2);
    assert_eq!(health.active_tasks, 0);
}

#[tokio::test]
async fn test_turnstile_submit_and_poll() {
    let (app, _) = build_test_app(vec![]);

    let (status, body) = get(&app, "/turnstile?url=https://example.com&sitekey=0x4AAAAAAA").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: TaskAccepted = serde_json::from_value(body).unwrap();

    let (status, poll) = wait_terminal(&app, "/results", &accepted.task_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poll.status, PollStatus::Ready);
    assert_eq!(poll.solution, Some(Solution::Token(TOKEN.to_string())));
    assert!(poll.elapsed_time.unwrap() > 0.0);

    // Repeated polls keep returning the result
    let (status, body) = get(&app, &format!("/results?id={}", accepted.task_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_turnstile_rejects_bad_input() {
    let (app, state) = build_test_app(vec![]);

    let (status, body) = get(&app, "/turnstile?url=https://example.com&sitekey=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (status, _) = get(&app, "/turnstile?sitekey=0x4AAAAAAA").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/turnstile?url=not-a-url&sitekey=0x4AAAAAAA").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Rejected submissions never create tasks
    assert_eq!(state.store.counts().unwrap().total(), 0);
}

#[tokio::test]
async fn test_poll_unknown_and_missing_id() {
    let (app, _) = build_test_app(vec![]);

    let (status, body) = get(&app, &format!("/results?id={}", uuid::Uuid::now_v7())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = get(&app, "/results?id=not-a-task").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/results").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_hcaptcha_grid_solve() {
    let provider = FakeProvider::ok("vision", vec![8, 0, 4, 4]);
    let (app, _) = build_test_app(vec![provider.clone()]);

    let (status, body) = post_json(&app, "/hcaptcha", &grid_body(3, 3)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: TaskAccepted = serde_json::from_value(body).unwrap();

    let (status, poll) = wait_terminal(&app, "/resolved", &accepted.task_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poll.status, PollStatus::Ready);

    // Replies are published sorted and without duplicates
    assert_eq!(poll.solution, Some(Solution::Tiles(vec![0, 4, 8])));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hcaptcha_out_of_grid_reply_falls_back() {
    let confused = FakeProvider::ok("confused", vec![42]);
    let second = FakeProvider::ok("secondary", vec![7]);
    let (app, _) = build_test_app(vec![confused.clone(), second.clone()]);

    let (_, body) = post_json(&app, "/hcaptcha", &grid_body(3, 3)).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let (_, poll) = wait_terminal(&app, "/resolved", &task_id).await;
    assert_eq!(poll.status, PollStatus::Ready);
    assert_eq!(poll.solution, Some(Solution::Tiles(vec![7])));
    assert_eq!(confused.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hcaptcha_provider_fallback() {
    let first = FakeProvider::failing("primary");
    let second = FakeProvider::ok("secondary", vec![1, 5]);
    let (app, state) = build_test_app(vec![first.clone(), second.clone()]);

    let (_, body) = post_json(&app, "/hcaptcha", &grid_body(3, 3)).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let (_, poll) = wait_terminal(&app, "/resolved", &task_id).await;
    assert_eq!(poll.solution, Some(Solution::Tiles(vec![1, 5])));
    assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.calls.load(Ordering::SeqCst), 1);

    let snapshot = state.metrics.snapshot();
    assert_eq!(snapshot.provider_fallbacks, 1);
    assert_eq!(snapshot.providers["primary"].failures, 1);
    assert_eq!(snapshot.providers["secondary"].successes, 1);
}

#[tokio::test]
async fn test_hcaptcha_all_providers_fail() {
    let (app, _) = build_test_app(vec![FakeProvider::failing("a"), FakeProvider::failing("b")]);

    let (_, body) = post_json(&app, "/hcaptcha", &grid_body(3, 3)).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let (status, poll) = wait_terminal(&app, "/resolved", &task_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poll.status, PollStatus::Error);
    assert!(poll.solution.is_none());
    assert!(poll.error.unwrap().contains("rate limited"));
}

#[tokio::test]
async fn test_hcaptcha_rejects_bad_grids() {
    let (app, _) = build_test_app(vec![FakeProvider::ok("vision", vec![])]);

    // Image count does not fill the grid
    let mut body = grid_body(3, 3);
    body["images"].as_array_mut().unwrap().pop();
    let (status, _) = post_json(&app, "/hcaptcha", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Grid larger than every provider takes
    let (status, body) = post_json(&app, "/hcaptcha", &grid_body(5, 5)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("capacity"));

    // Not base64
    let mut body = grid_body(1, 1);
    body["images"][0] = json!("%%%");
    let (status, _) = post_json(&app, "/hcaptcha", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Malformed JSON
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/hcaptcha")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_hcaptcha_requires_json_content_type() {
    let (app, _) = build_test_app(vec![FakeProvider::ok("vision", vec![])]);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/hcaptcha")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from(grid_body(3, 3).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_poll_with_wrong_endpoint_is_not_found() {
    let (app, _) = build_test_app(vec![]);

    let (_, body) = get(&app, "/turnstile?url=https://example.com&sitekey=0x4AAAAAAA").await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let (status, _) = get(&app, &format!("/resolved?id={task_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_evicted_task_is_not_found() {
    let (app, state) = build_test_app(vec![FakeProvider::ok("vision", vec![2])]);

    let (_, body) = post_json(&app, "/hcaptcha", &grid_body(3, 3)).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    wait_terminal(&app, "/resolved", &task_id).await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(prune_once(state.store.as_ref(), Duration::ZERO).unwrap(), 1);

    let (status, body) = get(&app, &format!("/resolved?id={task_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_finished_task() {
    let (app, _) = build_test_app(vec![]);

    let (_, body) = get(&app, "/turnstile?url=https://example.com&sitekey=0x4AAAAAAA").await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    wait_terminal(&app, "/results", &task_id).await;

    // Terminal tasks stay as they are
    let (status, body) = post_json(&app, &format!("/cancel?id={task_id}"), &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);

    let (status, _) = post_json(&app, &format!("/cancel?id={}", uuid::Uuid::now_v7()), &json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_reports_counts() {
    let (app, _) = build_test_app(vec![FakeProvider::ok("vision", vec![0])]);

    let (_, body) = post_json(&app, "/hcaptcha", &grid_body(2, 2)).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    wait_terminal(&app, "/resolved", &task_id).await;

    let (status, body) = get(&app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pool"]["size"], 2);
    assert_eq!(body["tasks"]["ready"], 1);
    assert_eq!(body["providers"], json!(["vision"]));
    assert_eq!(body["metrics"]["tasks_solved"], 1);
}
