//! HTTP trigger surface

pub mod handlers;
pub mod routes;

use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_request_body_size;

    Router::new()
        .route("/", post(handlers::ingest::ingest))
        .route("/ingest", post(handlers::ingest::ingest))
        .route("/health", get(handlers::health::health))
        .nest("/tasks", routes::task_routes())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
