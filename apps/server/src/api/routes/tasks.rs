use crate::api::handlers::tasks;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(tasks::get_queue_health))
        .route("/cleanup", post(tasks::cleanup_completed_tasks))
        .route("/:id", get(tasks::get_task))
}
