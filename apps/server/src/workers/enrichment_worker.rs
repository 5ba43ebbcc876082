//! Executes queued identifier writes against the FHIR stores

use crate::{
    clients::{ApiError, GcpHttp},
    queue::{QueuedTask, TaskQueue},
    Result,
};
use chrono::Utc;
use reqwest::{header::HeaderMap, Method};
use std::sync::Arc;
use std::time::Duration;

/// What happened to one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Completed,
    Retry {
        error: String,
        retry_after: Option<Duration>,
    },
    Failed(String),
}

pub struct EnrichmentWorker {
    queue: Arc<dyn TaskQueue>,
    http: GcpHttp,
    worker_id: String,
}

impl EnrichmentWorker {
    pub fn new(queue: Arc<dyn TaskQueue>, http: GcpHttp, worker_id: impl Into<String>) -> Self {
        Self {
            queue,
            http,
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Claim and process a single task. Returns false when nothing was due.
    pub async fn run_once(&self) -> Result<bool> {
        match self.queue.dequeue(&self.worker_id).await? {
            Some(task) => {
                self.process_task(task).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deliver `task` and record the result in the queue.
    pub async fn process_task(&self, task: QueuedTask) -> Result<DeliveryResult> {
        let result = self.deliver(&task).await;
        match &result {
            DeliveryResult::Completed => {
                self.queue.complete_task(task.id).await?;
                tracing::debug!(
                    task_id = %task.id,
                    target = %task.task.target_resource_path,
                    "Resource identifiers updated"
                );
            }
            DeliveryResult::Retry { error, retry_after } => {
                self.queue
                    .fail_task(task.id, error.clone(), true, *retry_after)
                    .await?;
            }
            DeliveryResult::Failed(error) => {
                self.queue
                    .fail_task(task.id, error.clone(), false, None)
                    .await?;
            }
        }
        Ok(result)
    }

    async fn deliver(&self, task: &QueuedTask) -> DeliveryResult {
        let method = match Method::from_bytes(task.task.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => return DeliveryResult::Failed(format!("Invalid method '{}'", task.task.method)),
        };
        let body = match serde_json::to_vec(&task.task.body) {
            Ok(body) => body,
            Err(e) => return DeliveryResult::Failed(format!("Invalid task body: {}", e)),
        };

        let mut request = self.http.request(method, &task.task.target_resource_path);
        for (name, value) in &task.task.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = ApiError::from(e);
                return DeliveryResult::Retry {
                    error: error.to_string(),
                    retry_after: None,
                };
            }
        };

        if response.status().is_success() {
            return DeliveryResult::Completed;
        }

        let retry_after = parse_retry_after_header(response.headers());
        let error = ApiError::from_response(response).await;
        if error.is_retryable() {
            DeliveryResult::Retry {
                error: error.to_string(),
                retry_after,
            }
        } else {
            DeliveryResult::Failed(error.to_string())
        }
    }
}

/// `Retry-After` as delta-seconds or an HTTP date. Dates in the past yield `None`.
pub fn parse_retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;

    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    (at.with_timezone(&Utc) - Utc::now()).to_std().ok()
}
