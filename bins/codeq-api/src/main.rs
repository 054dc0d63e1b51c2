mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use codeq_common::config::DispatchConfig;
use codeq_dispatch::piston::DEFAULT_PISTON_URL;
use codeq_dispatch::{PistonExecutor, QueueManager};
use metrics::Metrics;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub struct AppState {
    pub queue: QueueManager,
    pub metrics: Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if wants_json_logs(std::env::var("LOG_FORMAT").ok().as_deref()) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    info!("Codeq API booting...");

    let config = DispatchConfig::from_env().context("Invalid dispatch configuration")?;
    info!(
        max_concurrent = config.max_concurrent,
        max_queue_size = config.max_queue_size,
        max_retries = config.max_retries,
        result_ttl_secs = config.result_ttl.as_secs(),
        failure_threshold = config.failure_threshold,
        recovery_timeout_secs = config.recovery_timeout.as_secs(),
        "Dispatch configuration loaded"
    );

    let piston_url = std::env::var("PISTON_URL")
        .unwrap_or_else(|_| DEFAULT_PISTON_URL.to_string());
    let executor = PistonExecutor::new(piston_url.as_str())
        .context("Failed to create Piston client")?;
    info!("Execution backend: {}", executor.base_url());

    let queue = QueueManager::new(config, Arc::new(executor))
        .context("Failed to create queue manager")?;
    queue.start().await;

    let metrics = Metrics::new().context("Failed to register metrics")?;
    let state = Arc::new(AppState { queue, metrics });

    // Build router
    let app = Router::new()
        .merge(routes::routes())
        .with_state(state.clone());

    // Start server
    let addr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr).await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept executions");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Drain in-flight executions before exiting
    state.queue.stop().await;
    info!("API shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal, draining executions...");
}

/// `LOG_FORMAT=json` switches to one JSON object per line
fn wants_json_logs(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.trim().eq_ignore_ascii_case("json"))
}
