use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, BrowserLauncher, BrowserSession};

/// Sessions idle longer than this are pinged before reuse
const IDLE_PING_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Unhealthy,
}

/// A pool slot: owns at most one browser session, launched on first use
pub struct Worker {
    id: u64,
    status: WorkerStatus,
    launcher: Arc<dyn BrowserLauncher>,
    session: Option<Box<dyn BrowserSession>>,
    /// Proxy the current session was launched with
    proxy: Option<String>,
    solves: u32,
    recycle_after: u32,
    last_used: Instant,
}

impl Worker {
    pub(crate) fn new(id: u64, launcher: Arc<dyn BrowserLauncher>, recycle_after: u32) -> Self {
        Self {
            id,
            status: WorkerStatus::Idle,
            launcher,
            session: None,
            proxy: None,
            solves: 0,
            recycle_after,
            last_used: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: WorkerStatus) {
        self.status = status;
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Borrow a browser session routed through `proxy`.
    ///
    /// Launches lazily, relaunches when the proxy differs from the one the
    /// session was started with, when the recycle budget is spent, or when
    /// a long-idle session no longer answers.
    pub async fn browser(&mut self, proxy: Option<&str>) -> Result<&mut Box<dyn BrowserSession>, BrowserError> {
        let proxy_changed = self.proxy.as_deref() != proxy;
        let worn_out = self.recycle_after > 0 && self.solves >= self.recycle_after;

        if self.session.is_some() && (proxy_changed || worn_out) {
            info!(worker_id = self.id, proxy_changed, solves = self.solves, "Recycling browser session");
            self.discard_session();
        }

        if self.last_used.elapsed() > IDLE_PING_AFTER {
            if let Some(session) = self.session.as_mut() {
                if let Err(e) = session.execute("return true;", Vec::new()).await {
                    warn!(worker_id = self.id, error = %e, "Idle session failed health check");
                    self.discard_session();
                }
            }
        }

        if self.session.is_none() {
            let session = self.launcher.launch(proxy).await?;
            debug!(worker_id = self.id, session_id = session.id(), "Browser session launched");
            self.session = Some(session);
            self.proxy = proxy.map(str::to_string);
            self.solves = 0;
        }

        self.last_used = Instant::now();
        self.session
            .as_mut()
            .ok_or_else(|| BrowserError::Protocol("session missing after launch".into()))
    }

    /// Count a finished solve against the recycle budget
    pub(crate) fn record_solve(&mut self) {
        self.solves += 1;
        self.last_used = Instant::now();
    }

    fn discard_session(&mut self) {
        if let Some(session) = self.session.take() {
            spawn_close(self.id, session);
        }
        self.proxy = None;
        self.solves = 0;
    }

    /// Close the browser session, if any
    pub(crate) async fn shutdown(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(worker_id = self.id, error = %e, "Failed to close browser session");
            }
        }
    }
}

fn spawn_close(worker_id: u64, session: Box<dyn BrowserSession>) {
    tokio::spawn(async move {
        if let Err(e) = session.close().await {
            warn!(worker_id, error = %e, "Failed to close browser session");
        }
    });
}
