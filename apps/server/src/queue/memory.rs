//! In-process enrichment task queue.
//!
//! Same claiming and retry semantics as the Postgres queue, without
//! durability. Dispatch pacing is left to the worker loop, since a single
//! process owns the queue. Used for local runs and tests.

use super::{models::*, traits::TaskQueue};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    queues: HashMap<String, QueueSettings>,
    /// Insertion order doubles as FIFO order for equally-due tasks.
    tasks: Vec<QueuedTask>,
}

pub struct MemoryTaskQueue {
    queue_name: String,
    inner: Mutex<Inner>,
}

impl MemoryTaskQueue {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of every task ever enqueued, in enqueue order.
    pub fn tasks(&self) -> Vec<QueuedTask> {
        self.lock().tasks.clone()
    }

    /// Settings last written by `ensure_queue`, if any.
    pub fn settings(&self) -> Option<QueueSettings> {
        self.lock().queues.get(&self.queue_name).cloned()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn ensure_queue(&self, settings: &QueueSettings) -> Result<()> {
        self.lock()
            .queues
            .insert(settings.name.clone(), settings.clone());
        Ok(())
    }

    async fn enqueue(&self, task: EnrichmentTask) -> Result<Uuid> {
        let mut inner = self.lock();
        let max_attempts = inner
            .queues
            .get(&self.queue_name)
            .map(|q| q.retry.max_attempts)
            .ok_or_else(|| {
                crate::Error::Enqueue(format!("queue '{}' does not exist", self.queue_name))
            })?;

        let now = Utc::now();
        let id = Uuid::new_v4();
        inner.tasks.push(QueuedTask {
            id,
            queue_name: self.queue_name.clone(),
            task,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts,
            last_error: None,
            scheduled_at: now,
            created_at: now,
            started_at: None,
            completed_at: None,
            worker_id: None,
        });
        Ok(id)
    }

    async fn dequeue(&self, worker_id: &str) -> Result<Option<QueuedTask>> {
        let now = Utc::now();
        let mut inner = self.lock();

        let running: Vec<String> = inner
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.task.target_resource_path.clone())
            .collect();

        let next = inner
            .tasks
            .iter_mut()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.scheduled_at <= now
                    && !running.contains(&t.task.target_resource_path)
            })
            .min_by_key(|t| (t.scheduled_at, t.created_at));

        Ok(next.map(|task| {
            task.status = TaskStatus::Running;
            task.started_at = Some(now);
            task.worker_id = Some(worker_id.to_string());
            task.attempts += 1;
            task.clone()
        }))
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<QueuedTask>> {
        Ok(self.lock().tasks.iter().find(|t| t.id == task_id).cloned())
    }

    async fn complete_task(&self, task_id: Uuid) -> Result<()> {
        let mut inner = self.lock();
        if let Some(task) = inner.tasks.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        error_message: String,
        retry: bool,
        retry_after: Option<Duration>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.lock();
        let policy = inner
            .queues
            .get(&self.queue_name)
            .map(|q| q.retry)
            .unwrap_or_default();

        let Some(task) = inner.tasks.iter_mut().find(|t| t.id == task_id) else {
            return Ok(());
        };

        task.last_error = Some(error_message);
        if retry && task.can_retry() {
            let delay = policy.time_until_next_retry(task.attempts.max(1) as u32, retry_after);
            task.status = TaskStatus::Pending;
            task.scheduled_at = now
                + chrono::Duration::from_std(delay)
                    .map_err(|e| crate::Error::Internal(format!("Invalid retry delay: {}", e)))?;
            task.started_at = None;
            task.worker_id = None;
        } else {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(now);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<serde_json::Value> {
        let inner = self.lock();
        let count = |status: TaskStatus| inner.tasks.iter().filter(|t| t.status == status).count();
        Ok(serde_json::json!({
            "status": "ok",
            "backend": "memory",
            "queue": self.queue_name,
            "stats": {
                "total": inner.tasks.len(),
                "pending": count(TaskStatus::Pending),
                "running": count(TaskStatus::Running),
                "completed": count(TaskStatus::Completed),
                "failed": count(TaskStatus::Failed)
            }
        }))
    }

    async fn cleanup_completed(&self, days: i32) -> Result<i64> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let mut inner = self.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|t| {
            !(t.status.is_terminal() && t.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - inner.tasks.len()) as i64)
    }
}
