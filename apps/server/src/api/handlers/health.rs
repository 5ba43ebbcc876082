use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Liveness plus queue reachability. A broken queue degrades the status to 503.
pub async fn health(State(state): State<AppState>) -> Response {
    match state.task_queue.health_check().await {
        Ok(queue) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "queue": queue,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Queue health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "service": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                    "queue": { "status": "error", "error": e.to_string() },
                })),
            )
                .into_response()
        }
    }
}
