//! Clients for the external Google Cloud APIs the pipeline talks to.
//!
//! Each API sits behind a trait so the pipeline can be exercised against
//! in-memory fakes; the concrete clients share one [`GcpHttp`] transport.

pub mod healthcare;
pub mod pubsub;
pub mod storage;

pub use healthcare::{ContentStructure, DatasetRef, FhirStoreApi, HealthcareClient};
pub use pubsub::{LogOnlyBus, MessageBus, PubSubClient};
pub use storage::{GcsClient, ObjectStore};

use crate::config::Config;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use std::fmt;
use std::time::Duration;

/// Status codes that indicate a transient upstream condition.
pub const RETRYABLE_STATUS_CODES: [u16; 3] = [429, 500, 503];

/// Failure returned by an external API call.
///
/// `status` is `None` when no response was received (timeout, connection reset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Transport failures and 429/500/503 responses can be retried.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(status) => RETRYABLE_STATUS_CODES.contains(&status),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        self.status == Some(StatusCode::CONFLICT.as_u16())
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(StatusCode::NOT_FOUND.as_u16())
    }

    /// Status to record for this failure. Transport failures count as 503.
    pub fn status_code(&self) -> u16 {
        self.status
            .unwrap_or(StatusCode::SERVICE_UNAVAILABLE.as_u16())
    }

    /// Convert a non-success response into an error, keeping the body for diagnostics.
    pub async fn from_response(response: Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body
        };
        Self::status(status.as_u16(), message)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => Self::status(status.as_u16(), error.to_string()),
            None => Self::transport(error.to_string()),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "transport error: {}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// Shared HTTP transport with timeout and optional bearer token.
#[derive(Clone)]
pub struct GcpHttp {
    client: reqwest::Client,
    access_token: Option<String>,
}

impl GcpHttp {
    pub fn new(timeout: Duration, access_token: Option<String>) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fhirstore-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            access_token,
        })
    }

    pub fn from_config(config: &Config) -> crate::Result<Self> {
        Self::new(config.request_timeout(), config.gcp.access_token.clone())
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and turn non-2xx responses into [`ApiError`].
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_response(response).await)
        }
    }
}
