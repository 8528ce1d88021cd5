//! Retention policy: evict terminal tasks once they have been complete for
//! longer than the configured retention window.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::{Result, TaskStore};

/// Run one pruning pass
pub fn prune_once(store: &dyn TaskStore, retention: Duration) -> Result<usize> {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(retention)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    store.prune_completed_before(cutoff)
}

/// Spawn the background pruning loop. Aborting the handle stops it.
pub fn spawn_pruner(
    store: Arc<dyn TaskStore>,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    info!(?retention, ?interval, "Starting task pruner");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match prune_once(store.as_ref(), retention) {
                Ok(0) => debug!("No expired tasks"),
                Ok(pruned) => info!(pruned, "Evicted expired tasks"),
                Err(e) => warn!(error = %e, "Task pruning failed"),
            }
        }
    })
}
