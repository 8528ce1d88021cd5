use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{
    services::{
        cancel_task, health, hcaptcha_result, status, submit_hcaptcha, submit_turnstile,
        turnstile_result,
    },
    state::AppState,
};
use crate::config::Config;
use crate::tasks::spawn_pruner;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All routes with middleware applied
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/turnstile", get(submit_turnstile))
        .route("/results", get(turnstile_result))
        .route("/hcaptcha", post(submit_hcaptcha))
        .route("/resolved", get(hcaptcha_result))
        .route("/cancel", post(cancel_task))
        .with_state(state)
        // Gzip request bodies are decoded before handlers see them
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);
    let retention = config.store.retention.get();
    let prune_interval = config.store.prune_interval.get();

    info!(
        threads = config.pool.threads,
        webdriver = %config.browser.webdriver_url,
        store = ?config.store.backend,
        "Building service"
    );
    let state = AppState::from_config(config)?;
    let pool = state.pool.clone();

    let pruner = spawn_pruner(state.store.clone(), retention, prune_interval);

    let app = router(state);
    let listener = TcpListener::bind(address).await?;
    info!(%address, "SolveBox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pruner.abort();
    pool.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
