//! Fixed-size worker pool
//!
//! Capacity is a fair [`Semaphore`] with one permit per worker, so waiting
//! acquirers are served in arrival order. Idle workers sit on a stack
//! behind a mutex; a permit holder always finds either an idle worker or
//! room to build a fresh one, which is how discarded workers get replaced.

pub mod worker;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

pub use worker::{Worker, WorkerStatus};

use crate::browser::BrowserLauncher;
use crate::config::PoolConfig;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("No worker became available within {0:?}")]
    Unavailable(Duration),

    #[error("Worker pool is shut down")]
    Closed,
}

/// Tunables taken from `[pool]`
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub acquire_timeout: Option<Duration>,
    pub recycle_after: u32,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            acquire_timeout: config.acquire_timeout.map(|t| t.get()),
            recycle_after: config.recycle_after,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub size: usize,
    pub idle: usize,
    pub busy: usize,
    /// Workers currently holding a live browser session
    pub sessions: usize,
    /// Workers discarded as unhealthy since start
    pub discarded: u64,
}

/// A checked-out worker. Hand it back with [`WorkerPool::release`].
///
/// Dropping a lease without releasing (a panicking solve) frees the slot
/// but loses the worker; the next acquirer builds a replacement.
pub struct WorkerLease {
    worker: Worker,
    _busy: BusyGuard,
    _permit: OwnedSemaphorePermit,
}

/// Counts a lease as busy for exactly as long as it lives
struct BusyGuard(Arc<AtomicUsize>);

impl BusyGuard {
    fn new(busy: &Arc<AtomicUsize>) -> Self {
        busy.fetch_add(1, Ordering::Relaxed);
        Self(busy.clone())
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl WorkerLease {
    pub fn worker(&mut self) -> &mut Worker {
        &mut self.worker
    }
}

pub struct WorkerPool {
    size: usize,
    launcher: Arc<dyn BrowserLauncher>,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Worker>>,
    next_id: AtomicU64,
    busy: Arc<AtomicUsize>,
    discarded: AtomicU64,
}

impl WorkerPool {
    pub fn new(size: usize, launcher: Arc<dyn BrowserLauncher>, settings: PoolSettings) -> Self {
        info!(size, recycle_after = settings.recycle_after, "Worker pool created");
        Self {
            size,
            launcher,
            settings,
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::with_capacity(size)),
            next_id: AtomicU64::new(1),
            busy: Arc::new(AtomicUsize::new(0)),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for a free worker
    pub async fn acquire(&self) -> Result<WorkerLease, PoolError> {
        let permit = match self.settings.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.permits.clone().acquire_owned())
                .await
                .map_err(|_| PoolError::Unavailable(limit))?,
            None => self.permits.clone().acquire_owned().await,
        }
        .map_err(|_| PoolError::Closed)?;

        let mut worker = match self.pop_idle() {
            Some(worker) => worker,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id = id, "Creating worker");
                Worker::new(id, self.launcher.clone(), self.settings.recycle_after)
            }
        };
        worker.set_status(WorkerStatus::Busy);

        Ok(WorkerLease {
            worker,
            _busy: BusyGuard::new(&self.busy),
            _permit: permit,
        })
    }

    /// Return a worker. Unhealthy workers are discarded and their session
    /// closed in the background.
    pub fn release(&self, lease: WorkerLease, healthy: bool) {
        let WorkerLease {
            mut worker,
            _busy,
            _permit,
        } = lease;

        if !healthy {
            worker.set_status(WorkerStatus::Unhealthy);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            warn!(worker_id = worker.id(), "Discarding unhealthy worker");
            tokio::spawn(worker.shutdown());
        } else if self.permits.is_closed() {
            tokio::spawn(worker.shutdown());
        } else {
            worker.set_status(WorkerStatus::Idle);
            match self.idle.lock() {
                Ok(mut idle) => idle.push(worker),
                Err(_) => {
                    warn!("Idle list lock poisoned, dropping worker");
                    tokio::spawn(worker.shutdown());
                }
            }
        }
        // Busy count and permit drop here, after the worker is back on the stack
    }

    pub fn status(&self) -> PoolStatus {
        let (idle, sessions) = self
            .idle
            .lock()
            .map(|idle| (idle.len(), idle.iter().filter(|w| w.has_session()).count()))
            .unwrap_or_default();
        let busy = self.busy.load(Ordering::Relaxed);

        PoolStatus {
            size: self.size,
            // Slots not yet built count as idle
            idle: self.size.saturating_sub(busy).max(idle),
            busy,
            sessions,
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out workers and close every idle session. Busy workers
    /// are closed as they are released.
    pub async fn shutdown(&self) {
        self.permits.close();
        let workers: Vec<Worker> = match self.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        info!(closing = workers.len(), "Shutting down worker pool");
        for worker in workers {
            worker.shutdown().await;
        }
    }

    fn pop_idle(&self) -> Option<Worker> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::NullLauncher;
    use super::*;

    fn pool(size: usize, acquire_timeout: Option<Duration>) -> (WorkerPool, Arc<NullLauncher>) {
        let launcher = Arc::new(NullLauncher::default());
        let pool = WorkerPool::new(
            size,
            launcher.clone(),
            PoolSettings {
                acquire_timeout,
                recycle_after: 2,
            },
        );
        (pool, launcher)
    }

    #[tokio::test]
    async fn test_acquire_release_reuses_worker() {
        let (pool, _) = pool(1, None);

        let mut lease = pool.acquire().await.unwrap();
        let first_id = lease.worker().id();
        pool.release(lease, true);

        let mut lease = pool.acquire().await.unwrap();
        assert_eq!(lease.worker().id(), first_id);
        assert_eq!(lease.worker().status(), WorkerStatus::Busy);
        pool.release(lease, true);
    }

    #[tokio::test]
    async fn test_unhealthy_worker_is_replaced() {
        let (pool, _) = pool(1, None);

        let mut lease = pool.acquire().await.unwrap();
        let first_id = lease.worker().id();
        pool.release(lease, false);

        let mut lease = pool.acquire().await.unwrap();
        assert_ne!(lease.worker().id(), first_id);
        pool.release(lease, true);

        let status = pool.status();
        assert_eq!(status.size, 1);
        assert_eq!(status.discarded, 1);
        assert_eq!(status.busy, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_exhausted() {
        let (pool, _) = pool(1, Some(Duration::from_millis(100)));

        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, PoolError::Unavailable(_)));

        pool.release(held, true);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let (pool, _) = pool(1, None);
        let pool = Arc::new(pool);

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let lease = pool.acquire().await.unwrap();
                pool.release(lease, true);
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        pool.release(held, true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_launch_is_lazy_and_recycled() {
        let (pool, launcher) = pool(1, None);

        let mut lease = pool.acquire().await.unwrap();
        assert!(!lease.worker().has_session());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);

        for _ in 0..2 {
            lease.worker().browser(None).await.unwrap();
            lease.worker().record_solve();
        }
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);

        // Budget of two solves spent
        lease.worker().browser(None).await.unwrap();
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
        pool.release(lease, true);
    }

    #[tokio::test]
    async fn test_proxy_change_relaunches_session() {
        let (pool, launcher) = pool(1, None);

        let mut lease = pool.acquire().await.unwrap();
        lease.worker().browser(None).await.unwrap();
        lease.worker().browser(Some("http://proxy:8080")).await.unwrap();
        lease.worker().browser(Some("http://proxy:8080")).await.unwrap();

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
        assert_eq!(
            launcher.proxies.lock().unwrap().clone(),
            vec![None, Some("http://proxy:8080".to_string())]
        );
        pool.release(lease, true);
    }

    #[tokio::test]
    async fn test_dropped_lease_frees_slot_and_busy_count() {
        let (pool, _) = pool(1, None);

        let lease = pool.acquire().await.unwrap();
        assert_eq!(pool.status().busy, 1);
        drop(lease);

        let status = pool.status();
        assert_eq!(status.busy, 0);
        assert_eq!(status.idle, 1);

        let lease = pool.acquire().await.unwrap();
        pool.release(lease, true);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_acquires() {
        let (pool, _) = pool(2, None);
        let lease = pool.acquire().await.unwrap();
        pool.release(lease, true);

        pool.shutdown().await;
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}
