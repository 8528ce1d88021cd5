//! Metrics counters and tracing setup

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Process-wide counters, shared through `AppState`
#[derive(Debug, Default)]
pub struct Metrics {
    tasks_submitted: AtomicU64,
    tasks_rejected: AtomicU64,
    tasks_solved: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_timed_out: AtomicU64,
    provider_fallbacks: AtomicU64,
    providers: Mutex<BTreeMap<String, ProviderStats>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_submitted", "Metric incremented");
    }

    pub fn task_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_rejected", "Metric incremented");
    }

    pub fn task_solved(&self) {
        self.tasks_solved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_timed_out(&self) {
        self.tasks_timed_out.fetch_add(1, Ordering::Relaxed);
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provider_fallback(&self) {
        self.provider_fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "provider_fallbacks", "Metric incremented");
    }

    /// Record one provider call and its latency
    pub fn provider_call(&self, provider: &str, success: bool, latency: Duration) {
        let Ok(mut providers) = self.providers.lock() else {
            return;
        };
        let stats = providers.entry(provider.to_string()).or_default();
        stats.requests += 1;
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        stats.total_latency_ms += latency.as_millis() as u64;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let providers = self
            .providers
            .lock()
            .map(|providers| {
                providers
                    .iter()
                    .map(|(name, stats)| (name.clone(), stats.snapshot()))
                    .collect()
            })
            .unwrap_or_default();

        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            tasks_solved: self.tasks_solved.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_timed_out: self.tasks_timed_out.load(Ordering::Relaxed),
            provider_fallbacks: self.provider_fallbacks.load(Ordering::Relaxed),
            providers,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ProviderStats {
    requests: u64,
    successes: u64,
    failures: u64,
    total_latency_ms: u64,
}

impl ProviderStats {
    fn snapshot(&self) -> ProviderSnapshot {
        ProviderSnapshot {
            requests: self.requests,
            successes: self.successes,
            failures: self.failures,
            avg_latency_ms: self.total_latency_ms.checked_div(self.requests).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_rejected: u64,
    pub tasks_solved: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub provider_fallbacks: u64,
    pub providers: BTreeMap<String, ProviderSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency_ms: u64,
}
