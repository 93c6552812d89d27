use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

use super::AppState;
use crate::aggregate::{Question, TranscriptSegment};

#[derive(Serialize)]
struct UnconsolidatedResponse {
    segments: Vec<TranscriptSegment>,
}

#[derive(Serialize)]
struct ConsolidatedResponse {
    text: String,
    revision: u64,
}

#[derive(Serialize)]
struct QuestionsResponse {
    questions: Vec<Question>,
}

/// `GET /v1/transcript/unconsolidated`. Empty before the pipeline's first
/// `start()`, same as every other snapshot endpoint.
pub async fn unconsolidated(State(supervisor): State<AppState>) -> impl IntoResponse {
    match supervisor.aggregator_snapshot().await {
        Some(snapshot) => Json(UnconsolidatedResponse { segments: snapshot.unconsolidated }).into_response(),
        None => Json(json!({ "segments": [] })).into_response(),
    }
}

pub async fn consolidated(State(supervisor): State<AppState>) -> impl IntoResponse {
    match supervisor.aggregator_snapshot().await {
        Some(snapshot) => {
            Json(ConsolidatedResponse { text: snapshot.consolidated_text, revision: snapshot.consolidated_revision })
                .into_response()
        }
        None => Json(json!({ "text": "", "revision": 0 })).into_response(),
    }
}

pub async fn questions(State(supervisor): State<AppState>) -> impl IntoResponse {
    match supervisor.aggregator_snapshot().await {
        Some(snapshot) => Json(QuestionsResponse { questions: snapshot.questions }).into_response(),
        None => Json(json!({ "questions": [] })).into_response(),
    }
}
