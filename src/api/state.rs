use std::sync::Arc;
use std::time::Instant;

use crate::browser::{BrowserLauncher, WebDriverLauncher};
use crate::config::Config;
use crate::observability::Metrics;
use crate::pool::{PoolSettings, WorkerPool};
use crate::queue::Dispatcher;
use crate::solver::images::ImageLimits;
use crate::solver::providers::build_providers;
use crate::solver::{
    HcaptchaStrategy, ProviderChain, SolverSet, TurnstileSettings, TurnstileStrategy, VisionProvider,
};
use crate::tasks::{TaskStore, open_store};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Process-wide context handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn TaskStore>,
    pub pool: Arc<WorkerPool>,
    pub dispatcher: Dispatcher,
    pub metrics: Arc<Metrics>,
    pub providers: Arc<Vec<String>>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire components that were built by the caller
    pub fn new(
        config: Config,
        store: Arc<dyn TaskStore>,
        pool: Arc<WorkerPool>,
        solvers: SolverSet,
        provider_names: Vec<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            store.clone(),
            pool.clone(),
            solvers,
            metrics.clone(),
            config.solver.solve_timeout.get(),
        );

        Self {
            config: Arc::new(config),
            store,
            pool,
            dispatcher,
            metrics,
            providers: Arc::new(provider_names),
            started_at: Instant::now(),
        }
    }

    /// Build the production stack described by `config`
    pub fn from_config(config: Config) -> Result<Self, AnyError> {
        let metrics = Arc::new(Metrics::new());
        let store = open_store(&config.store)?;

        let launcher: Arc<dyn BrowserLauncher> = Arc::new(WebDriverLauncher::new(config.browser.clone())?);
        let pool = Arc::new(WorkerPool::new(
            config.pool.threads,
            launcher,
            PoolSettings::from(&config.pool),
        ));

        let providers = build_providers(&config.providers)?;
        Ok(Self::with_providers(config, store, pool, providers, metrics))
    }

    /// Register both strategies around an explicit provider list
    pub fn with_providers(
        config: Config,
        store: Arc<dyn TaskStore>,
        pool: Arc<WorkerPool>,
        providers: Vec<Arc<dyn VisionProvider>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let names = providers.iter().map(|p| p.name().to_string()).collect();
        let chain = Arc::new(ProviderChain::new(providers, metrics.clone()));

        let solvers = SolverSet::new()
            .with(Arc::new(TurnstileStrategy::new(TurnstileSettings::from(&config.solver))))
            .with(Arc::new(HcaptchaStrategy::new(chain, ImageLimits::from(&config.solver))));

        Self::new(config, store, pool, solvers, names, metrics)
    }
}
