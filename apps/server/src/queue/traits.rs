//! Task queue trait definition

use super::models::*;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Abstract interface for enrichment task queue implementations
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Create the queue or update its settings. Safe to call repeatedly.
    async fn ensure_queue(&self, settings: &QueueSettings) -> Result<()>;

    /// Enqueue a new task. Fails with `Error::Enqueue` until `ensure_queue` has run.
    async fn enqueue(&self, task: EnrichmentTask) -> Result<Uuid>;

    /// Claim the next due task.
    ///
    /// A task is never handed out while another task for the same
    /// `target_resource_path` is running. Shared backends also hold back
    /// tasks once the queue's dispatch rate or concurrency cap is reached.
    async fn dequeue(&self, worker_id: &str) -> Result<Option<QueuedTask>>;

    async fn get_task(&self, task_id: Uuid) -> Result<Option<QueuedTask>>;

    /// Mark task as completed
    async fn complete_task(&self, task_id: Uuid) -> Result<()>;

    /// Mark task as failed, rescheduling it when `retry` is set and attempts remain.
    /// `retry_after` is the delay requested by the server, if any.
    async fn fail_task(
        &self,
        task_id: Uuid,
        error_message: String,
        retry: bool,
        retry_after: Option<Duration>,
    ) -> Result<()>;

    /// Health check
    async fn health_check(&self) -> Result<serde_json::Value>;

    /// Remove completed and failed tasks older than `days`
    async fn cleanup_completed(&self, days: i32) -> Result<i64>;
}
