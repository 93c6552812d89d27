use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

use super::AppState;
use crate::error::MediatorError;
use crate::supervisor::PipelineState;

#[derive(Serialize)]
struct StartResponse {
    success: bool,
    state: PipelineState,
}

/// `POST /v1/control/start`. Rejected with 409 unless the pipeline is
/// STOPPED or ERROR, mirroring the original's `Pipeline.start()` guard.
pub async fn start(State(supervisor): State<AppState>) -> impl IntoResponse {
    match supervisor.start().await {
        Ok(state) => (StatusCode::OK, Json(StartResponse { success: true, state })).into_response(),
        Err(MediatorError::InvalidState) => (
            StatusCode::CONFLICT,
            Json(json!({ "success": false, "detail": "pipeline is already running" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "detail": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Serialize)]
struct StopResponse {
    success: bool,
    state: PipelineState,
    already_stopped: bool,
}

/// `POST /v1/control/stop`. Idempotent: stopping an already-STOPPED pipeline
/// just reports `already_stopped` rather than erroring.
pub async fn stop(State(supervisor): State<AppState>) -> impl IntoResponse {
    let already_stopped = supervisor.state().await == PipelineState::Stopped;
    let state = supervisor.stop().await;
    Json(StopResponse { success: true, state, already_stopped })
}

pub async fn status(State(supervisor): State<AppState>) -> impl IntoResponse {
    Json(supervisor.status().await)
}

pub async fn health(State(supervisor): State<AppState>) -> impl IntoResponse {
    let health = supervisor.health().await;
    let code = if health.status == "unhealthy" { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (code, Json(health))
}

pub async fn metrics(State(supervisor): State<AppState>) -> impl IntoResponse {
    Json(supervisor.metrics())
}
