use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::observability::Metrics;
use crate::pool::WorkerPool;
use crate::solver::{SolveStrategy, SolverSet};
use crate::tasks::{
    ChallengeInput, ChallengeKind, FailureKind, StoreError, TaskId, TaskOutcome, TaskRecord, TaskState,
    TaskStore, Transition, TransitionResult,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("no solver registered for {0} challenges")]
    Unsupported(ChallengeKind),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Accepts submissions and runs them on the worker pool
///
/// Flow:
/// 1. `submit` validates with the kind's strategy, stores a pending record
///    and spawns the execution; the caller gets the id immediately
/// 2. The execution waits for a worker, marks the task running and runs
///    the solve under `solve_timeout`
/// 3. The worker goes back to the pool, then the outcome is applied. An
///    already-terminal task (cancelled) keeps its state and the late
///    outcome is dropped
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    pool: Arc<WorkerPool>,
    solvers: Arc<SolverSet>,
    metrics: Arc<Metrics>,
    solve_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        pool: Arc<WorkerPool>,
        solvers: SolverSet,
        metrics: Arc<Metrics>,
        solve_timeout: Duration,
    ) -> Self {
        Self {
            store,
            pool,
            solvers: Arc::new(solvers),
            metrics,
            solve_timeout,
        }
    }

    /// Validate and enqueue a challenge. Never waits for the solve.
    pub fn submit(&self, input: ChallengeInput) -> Result<TaskId, DispatchError> {
        let kind = input.kind();
        let strategy = self.solvers.get(kind).ok_or(DispatchError::Unsupported(kind))?;

        if let Err(e) = strategy.validate(&input) {
            self.metrics.task_rejected();
            debug!(%kind, error = %e, "Submission rejected");
            return Err(DispatchError::InvalidInput(e.to_string()));
        }

        let record = TaskRecord::new(input.clone(), Utc::now());
        let id = record.id();
        self.store.insert(record)?;
        self.metrics.task_submitted();
        info!(task_id = %id, %kind, "Task accepted");

        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.execute(id, input, strategy).await;
        });

        Ok(id)
    }

    /// Fail a task that has not finished yet. Returns `false` when it was
    /// already terminal.
    pub fn cancel(&self, id: &TaskId) -> Result<bool, DispatchError> {
        let outcome = TaskOutcome::failed(FailureKind::Cancelled, "cancelled by client");
        match self.store.transition(id, Transition::Finish(outcome), Utc::now())? {
            TransitionResult::Applied(_) => {
                self.metrics.task_failed();
                info!(task_id = %id, "Task cancelled");
                Ok(true)
            }
            TransitionResult::Rejected(_) => Ok(false),
            TransitionResult::NotFound => Err(DispatchError::NotFound(*id)),
        }
    }

    async fn execute(&self, id: TaskId, input: ChallengeInput, strategy: Arc<dyn SolveStrategy>) {
        let mut lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(task_id = %id, error = %e, "No worker for task");
                self.finish(&id, TaskOutcome::failed(FailureKind::WorkerUnavailable, e.to_string()));
                return;
            }
        };

        match self.store.transition(&id, Transition::Start, Utc::now()) {
            Ok(TransitionResult::Applied(_)) => {}
            Ok(other) => {
                debug!(task_id = %id, result = ?other, "Task no longer pending, skipping");
                self.pool.release(lease, true);
                return;
            }
            Err(e) => {
                error!(task_id = %id, error = %e, "Failed to mark task running");
                self.pool.release(lease, true);
                self.finish(&id, TaskOutcome::failed(FailureKind::Internal, e.to_string()));
                return;
            }
        }

        let worker_id = lease.worker().id();
        info!(task_id = %id, worker_id, kind = %input.kind(), "Task started");

        // Solve on its own task so a panicking strategy surfaces as a
        // JoinError instead of leaving the record running forever
        let solve_timeout = self.solve_timeout;
        let solve = tokio::spawn(async move {
            let result = tokio::time::timeout(solve_timeout, strategy.solve(&input, lease.worker())).await;
            (lease, result)
        });

        let outcome = match solve.await {
            Ok((mut lease, result)) => {
                let (outcome, healthy) = match result {
                    Ok(Ok(solution)) => (TaskOutcome::Ready(solution), true),
                    Ok(Err(e)) => {
                        warn!(task_id = %id, worker_id, error = %e, "Solve failed");
                        (
                            TaskOutcome::failed(e.failure_kind(), e.to_string()),
                            !e.is_session_level(),
                        )
                    }
                    Err(_) => {
                        warn!(task_id = %id, worker_id, timeout = ?solve_timeout, "Solve timed out");
                        // An interrupted browser session is in an unknown state
                        let healthy = !lease.worker().has_session();
                        (
                            TaskOutcome::failed(
                                FailureKind::Timeout,
                                format!("solve exceeded {solve_timeout:?}"),
                            ),
                            healthy,
                        )
                    }
                };
                lease.worker().record_solve();
                self.pool.release(lease, healthy);
                outcome
            }
            Err(e) => {
                error!(task_id = %id, worker_id, error = %e, "Solver task aborted");
                TaskOutcome::failed(FailureKind::Internal, format!("solver aborted: {e}"))
            }
        };

        self.finish(&id, outcome);
    }

    /// Record the terminal outcome unless the task is already terminal
    fn finish(&self, id: &TaskId, outcome: TaskOutcome) {
        match self.store.transition(id, Transition::Finish(outcome), Utc::now()) {
            Ok(TransitionResult::Applied(record)) => {
                let elapsed = record.elapsed_secs(Utc::now());
                match (record.state(), record.error_kind()) {
                    (TaskState::Ready, _) => {
                        self.metrics.task_solved();
                        info!(task_id = %id, elapsed, "Task solved");
                    }
                    (_, Some(FailureKind::Timeout)) => {
                        self.metrics.task_timed_out();
                        info!(task_id = %id, elapsed, "Task timed out");
                    }
                    (_, kind) => {
                        self.metrics.task_failed();
                        info!(task_id = %id, elapsed, error_kind = ?kind, "Task failed");
                    }
                }
            }
            Ok(TransitionResult::Rejected(e)) => {
                info!(task_id = %id, reason = %e, "Discarding late outcome");
            }
            Ok(TransitionResult::NotFound) => {
                warn!(task_id = %id, "Task disappeared before completion");
            }
            Err(e) => {
                error!(task_id = %id, error = %e, "Failed to record outcome");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::pool::testing::NullLauncher;
    use crate::pool::{PoolSettings, Worker};
    use crate::solver::SolveError;
    use crate::tasks::{MemoryStore, Solution, TurnstileInput};

    /// Strategy that sleeps, then answers with a fixed token
    struct SleepyStrategy {
        delay: Duration,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        fail_with: Option<fn() -> SolveError>,
    }

    impl SleepyStrategy {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                fail_with: None,
            }
        }
    }

    #[async_trait]
    impl SolveStrategy for SleepyStrategy {
        fn kind(&self) -> ChallengeKind {
            ChallengeKind::Turnstile
        }

        fn validate(&self, input: &ChallengeInput) -> Result<(), SolveError> {
            match input {
                ChallengeInput::Turnstile(t) if t.sitekey.starts_with("0x") => Ok(()),
                _ => Err(SolveError::InvalidInput("bad sitekey".into())),
            }
        }

        async fn solve(&self, _input: &ChallengeInput, _worker: &mut Worker) -> Result<Solution, SolveError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(Solution::Token("0.solved-token-value".into())),
            }
        }
    }

    fn input(sitekey: &str) -> ChallengeInput {
        ChallengeInput::Turnstile(TurnstileInput {
            url: "https://example.com".into(),
            sitekey: sitekey.into(),
            action: None,
            cdata: None,
            pagedata: None,
            proxy: None,
        })
    }

    fn dispatcher(strategy: SleepyStrategy, workers: usize, solve_timeout: Duration) -> (Dispatcher, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(WorkerPool::new(
            workers,
            Arc::new(NullLauncher::default()),
            PoolSettings {
                acquire_timeout: None,
                recycle_after: 0,
            },
        ));
        let dispatcher = Dispatcher::new(
            store.clone(),
            pool,
            SolverSet::new().with(Arc::new(strategy)),
            Arc::new(Metrics::new()),
            solve_timeout,
        );
        (dispatcher, store)
    }

    async fn wait_terminal(store: &MemoryStore, id: &TaskId) -> TaskRecord {
        for _ in 0..1000 {
            let record = store.get(id).unwrap().unwrap();
            if record.state().is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never finished");
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_returns_pending_then_ready() {
        let (dispatcher, store) = dispatcher(SleepyStrategy::new(Duration::from_secs(2)), 1, Duration::from_secs(60));

        let id = dispatcher.submit(input("0x123")).unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap().state(), TaskState::Pending);

        let record = wait_terminal(&store, &id).await;
        assert_eq!(record.state(), TaskState::Ready);
        assert_eq!(record.result(), Some(&Solution::Token("0.solved-token-value".into())));
        assert!(record.error_detail().is_none());
        assert!(record.input().is_none());
    }

    #[tokio::test]
    async fn test_invalid_input_creates_no_task() {
        let (dispatcher, store) = dispatcher(SleepyStrategy::new(Duration::ZERO), 1, Duration::from_secs(60));

        let err = dispatcher.submit(input("nope")).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(_)));
        assert_eq!(store.counts().unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_kind() {
        let (dispatcher, _) = dispatcher(SleepyStrategy::new(Duration::ZERO), 1, Duration::from_secs(60));
        let hcaptcha = ChallengeInput::Hcaptcha(crate::tasks::HcaptchaInput {
            images: vec![],
            instructions: "x".into(),
            rows: 3,
            columns: 3,
        });
        assert!(matches!(
            dispatcher.submit(hcaptcha),
            Err(DispatchError::Unsupported(ChallengeKind::Hcaptcha))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_never_exceeds_pool_size() {
        let strategy = SleepyStrategy::new(Duration::from_secs(1));
        let peak = strategy.peak.clone();
        let (dispatcher, store) = dispatcher(strategy, 2, Duration::from_secs(60));

        let ids: Vec<_> = (0..6).map(|_| dispatcher.submit(input("0x123")).unwrap()).collect();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let counts = store.counts().unwrap();
        assert_eq!(counts.running, 2);
        assert_eq!(counts.pending, 4);

        for id in &ids {
            assert_eq!(wait_terminal(&store, id).await.state(), TaskState::Ready);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_solve_timeout_marks_error() {
        let (dispatcher, store) = dispatcher(
            SleepyStrategy::new(Duration::from_secs(30)),
            1,
            Duration::from_secs(5),
        );

        let id = dispatcher.submit(input("0x123")).unwrap();
        let record = wait_terminal(&store, &id).await;

        assert_eq!(record.state(), TaskState::Error);
        assert_eq!(record.error_kind(), Some(FailureKind::Timeout));
        assert!(record.result().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_error_is_recorded() {
        let mut strategy = SleepyStrategy::new(Duration::from_millis(100));
        strategy.fail_with = Some(|| SolveError::Provider("all providers failed".into()));
        let (dispatcher, store) = dispatcher(strategy, 1, Duration::from_secs(60));

        let id = dispatcher.submit(input("0x123")).unwrap();
        let record = wait_terminal(&store, &id).await;

        assert_eq!(record.error_kind(), Some(FailureKind::ProviderFailure));
        assert_eq!(record.error_detail(), Some("all providers failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_strategy_frees_worker() {
        let mut strategy = SleepyStrategy::new(Duration::from_millis(100));
        strategy.fail_with = Some(|| panic!("solver bug"));
        let (dispatcher, store) = dispatcher(strategy, 2, Duration::from_secs(60));

        let id = dispatcher.submit(input("0x123")).unwrap();
        let record = wait_terminal(&store, &id).await;
        assert_eq!(record.error_kind(), Some(FailureKind::Internal));

        let status = dispatcher.pool.status();
        assert_eq!(status.busy, 0);
        assert_eq!(status.idle, 2);
        assert_eq!(store.counts().unwrap().running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wins_over_late_result() {
        let (dispatcher, store) = dispatcher(SleepyStrategy::new(Duration::from_secs(2)), 1, Duration::from_secs(60));

        let id = dispatcher.submit(input("0x123")).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(dispatcher.cancel(&id).unwrap());
        assert!(!dispatcher.cancel(&id).unwrap());

        // Let the solve finish; its result must not overwrite the cancellation
        tokio::time::sleep(Duration::from_secs(3)).await;
        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.error_kind(), Some(FailureKind::Cancelled));
        assert!(record.result().is_none());

        assert!(matches!(
            dispatcher.cancel(&TaskId::generate()),
            Err(DispatchError::NotFound(_))
        ));
    }
}
