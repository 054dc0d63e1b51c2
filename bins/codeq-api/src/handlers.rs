// HTTP route handlers for the Codeq API

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use codeq_dispatch::DispatchError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub stdin: String,
    #[serde(default)]
    pub execution_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub execution_id: String,
    pub status: &'static str,
}

/// POST /execute - Queue code for execution
pub async fn submit_execution(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    let language = payload.language.clone();
    let submitted = state.queue.submit(
        payload.code,
        payload.language,
        payload.stdin,
        payload.execution_id,
    );

    match submitted {
        Ok(execution_id) => {
            state.metrics.record_submission(true);
            info!(execution_id = %execution_id, language = %language, "Execution queued");
            (
                StatusCode::ACCEPTED,
                Json(SubmitResponse {
                    execution_id,
                    status: "queued",
                }),
            )
                .into_response()
        }
        Err(e @ DispatchError::QueueFull { .. }) => {
            state.metrics.record_submission(false);
            warn!(error = %e, "Execution rejected");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
        Err(e @ DispatchError::ShuttingDown) => {
            state.metrics.record_submission(false);
            error!(error = %e, "Execution rejected");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /execute/{execution_id} - Poll for a terminal outcome
pub async fn get_execution_result(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
) -> Response {
    match state.queue.get_result(&execution_id) {
        Some(outcome) => {
            debug!(execution_id = %execution_id, success = outcome.success, "Result retrieved");
            (StatusCode::OK, Json(outcome)).into_response()
        }
        // Still queued, executing, or already expired look the same to the caller
        None => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "execution_id": execution_id,
                "status": "pending",
                "message": "Execution is queued, still running, or its result has expired"
            })),
        )
            .into_response(),
    }
}

/// GET /status - Queue statistics
pub async fn queue_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.queue.get_status())
}

/// POST /breaker/reset - Force the circuit breaker closed
pub async fn reset_breaker(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.queue.reset_breaker();
    StatusCode::NO_CONTENT
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text exposition
pub async fn export_metrics(State(state): State<Arc<AppState>>) -> Response {
    state.metrics.observe_status(&state.queue.get_status());
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
