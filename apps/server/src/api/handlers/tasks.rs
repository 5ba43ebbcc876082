//! Enrichment task inspection and maintenance handlers

use crate::{state::AppState, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

pub async fn get_queue_health(State(state): State<AppState>) -> Result<Response> {
    let health = state.task_queue.health_check().await?;
    Ok((StatusCode::OK, Json(health)).into_response())
}

pub async fn get_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response> {
    let task = state
        .task_queue
        .get_task(id)
        .await?
        .ok_or_else(|| crate::Error::NotFound(format!("Task {} not found", id)))?;

    Ok((StatusCode::OK, Json(task)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CleanupTasksQuery {
    pub days: Option<i32>,
}

/// Delete finished tasks older than `days` (default 30)
pub async fn cleanup_completed_tasks(
    State(state): State<AppState>,
    Query(q): Query<CleanupTasksQuery>,
) -> Result<Response> {
    let days = q.days.unwrap_or(30);

    if days < 1 {
        return Err(crate::Error::Validation(
            "days must be at least 1".to_string(),
        ));
    }

    let deleted = state.task_queue.cleanup_completed(days).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "deleted": deleted,
            "days": days
        })),
    )
        .into_response())
}
