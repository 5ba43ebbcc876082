//! Error types for the ingestion service

use crate::clients::ApiError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected request parameters.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The referenced object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// 429/500/503 or a transport failure; the trigger should redeliver the event.
    #[error("Retryable API failure: {0}")]
    RetryableApi(ApiError),

    /// Any other API failure when the target version was known.
    #[error("API failure: {0}")]
    FatalApi(ApiError),

    #[error("Task queue unavailable: {0}")]
    Enqueue(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify an external API failure by its retryability.
    pub fn from_api(error: ApiError) -> Self {
        if error.is_retryable() {
            Error::RetryableApi(error)
        } else {
            Error::FatalApi(error)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RetryableApi(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::RetryableApi(_) | Error::Enqueue(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::FatalApi(e) => e
                .status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Error::Database(_) | Error::Http(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ApiError> for Error {
    fn from(error: ApiError) -> Self {
        Error::from_api(error)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = Json(json!({
            "status": "error",
            "retryable": self.is_retryable(),
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}
