//! Task queue data models

use crate::config::QueueConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub const FHIR_JSON_CONTENT_TYPE: &str = "application/fhir+json;charset=utf-8";

/// One deferred write: "replace this resource with this body".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentTask {
    pub method: String,
    pub target_resource_path: String,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

impl EnrichmentTask {
    /// A `PUT` of a FHIR resource body to `target_resource_path`.
    pub fn put_resource(target_resource_path: String, body: serde_json::Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "Content-Type".to_string(),
            FHIR_JSON_CONTENT_TYPE.to_string(),
        );
        Self {
            method: "PUT".to_string(),
            target_resource_path,
            headers,
            body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(crate::Error::Internal(format!(
                "Unknown task status '{}'",
                other
            ))),
        }
    }
}

/// A task as stored in the queue, with its delivery bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedTask {
    pub id: Uuid,
    pub queue_name: String,
    pub task: EnrichmentTask,
    pub status: TaskStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
}

impl QueuedTask {
    /// `attempts` counts deliveries already made, including the running one.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Exponential backoff between delivery attempts, bounded on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempt` failed deliveries.
    ///
    /// A server-provided `Retry-After` wins over the computed backoff but is
    /// still capped by `max_backoff`.
    pub fn time_until_next_retry(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let candidate = self
            .min_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        match retry_after {
            Some(preferred) => candidate.max(preferred).min(self.max_backoff),
            None => candidate,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Queue-level settings written by `ensure_queue`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSettings {
    pub name: String,
    pub max_dispatches_per_second: f64,
    pub max_concurrent_dispatches: i32,
    pub retry: RetryPolicy,
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            name: config.name.clone(),
            max_dispatches_per_second: config.max_dispatches_per_second,
            max_concurrent_dispatches: i32::try_from(config.max_concurrent_dispatches)
                .unwrap_or(i32::MAX),
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                min_backoff: Duration::from_secs(config.min_backoff_seconds),
                max_backoff: Duration::from_secs(config.max_backoff_seconds),
            },
        }
    }
}
