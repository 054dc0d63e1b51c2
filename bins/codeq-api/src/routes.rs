use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/execute", post(handlers::submit_execution))
        .route("/execute/:execution_id", get(handlers::get_execution_result))
        .route("/status", get(handlers::queue_status))
        .route("/breaker/reset", post(handlers::reset_breaker))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::export_metrics))
}
