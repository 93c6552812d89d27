mod control;
mod stream;
mod transcript;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::supervisor::Supervisor;

/// Shared state every handler sees (`axum::extract::State`), grounded in
/// §4.F's note that the supervisor is an owned instance rather than a
/// process-global.
pub type AppState = Arc<Supervisor>;

/// Mounts the control/observability surface named in §6. `main` binds and
/// serves this router directly; there is no separate web-UI surface (that
/// remains out of scope, per spec.md's Non-goals).
pub fn router(supervisor: AppState) -> Router {
    Router::new()
        .route("/v1/control/start", post(control::start))
        .route("/v1/control/stop", post(control::stop))
        .route("/v1/status", get(control::status))
        .route("/v1/health", get(control::health))
        .route("/v1/metrics", get(control::metrics))
        .route("/v1/transcript/unconsolidated", get(transcript::unconsolidated))
        .route("/v1/transcript/consolidated", get(transcript::consolidated))
        .route("/v1/transcript/questions", get(transcript::questions))
        .route("/v1/stream/transcript", get(stream::sse))
        .route("/v1/stream/transcript/ws", get(stream::ws))
        .with_state(supervisor)
}
