//! Storage notification trigger

use crate::models::{FailureRecord, MALFORMED_PATH};
use crate::{state::AppState, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

/// Run the pipeline for one storage change notification.
///
/// Terminal failures answer 200 with the failure record so the notification is
/// not redelivered; retryable failures answer 503.
pub async fn ingest(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let outcome = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => state.ingest_service.handle(&payload).await?,
        Err(e) => {
            let record = FailureRecord::invalid_event(
                format!("Bad request: {}", e),
                MALFORMED_PATH.to_string(),
            );
            state.ingest_service.reject(record).await
        }
    };
    Ok((StatusCode::OK, Json(outcome)).into_response())
}
