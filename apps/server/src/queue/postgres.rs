//! PostgreSQL-backed enrichment task queue

use super::{models::*, traits::TaskQueue};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

const TASK_COLUMNS: &str = "id, queue_name, method, target_resource_path, headers, body, \
     status, attempts, max_attempts, last_error, scheduled_at, created_at, started_at, \
     completed_at, worker_id";

/// Queue bound to one named queue; tasks of other queues are never touched.
pub struct PostgresTaskQueue {
    pool: PgPool,
    queue_name: String,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }

    async fn retry_policy(&self, queue_name: &str) -> Result<RetryPolicy> {
        let row = sqlx::query(
            r#"
            SELECT max_attempts, min_backoff_seconds, max_backoff_seconds
            FROM task_queues
            WHERE name = $1
            "#,
        )
        .bind(queue_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        let Some(row) = row else {
            return Ok(RetryPolicy::default());
        };

        let min_backoff: i64 = row.try_get("min_backoff_seconds")?;
        let max_backoff: i64 = row.try_get("max_backoff_seconds")?;
        Ok(RetryPolicy {
            max_attempts: row.try_get("max_attempts")?,
            min_backoff: Duration::from_secs(min_backoff.max(0) as u64),
            max_backoff: Duration::from_secs(max_backoff.max(0) as u64),
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    queue_name: String,
    method: String,
    target_resource_path: String,
    headers: sqlx::types::Json<BTreeMap<String, String>>,
    body: serde_json::Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    scheduled_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    worker_id: Option<String>,
}

impl TryFrom<TaskRow> for QueuedTask {
    type Error = crate::Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(QueuedTask {
            id: row.id,
            queue_name: row.queue_name,
            task: EnrichmentTask {
                method: row.method,
                target_resource_path: row.target_resource_path,
                headers: row.headers.0,
                body: row.body,
            },
            status: row.status.parse()?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            scheduled_at: row.scheduled_at,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            worker_id: row.worker_id,
        })
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    async fn ensure_queue(&self, settings: &QueueSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_queues (
                name, max_dispatches_per_second, max_concurrent_dispatches,
                max_attempts, min_backoff_seconds, max_backoff_seconds
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO UPDATE
            SET max_dispatches_per_second = EXCLUDED.max_dispatches_per_second,
                max_concurrent_dispatches = EXCLUDED.max_concurrent_dispatches,
                max_attempts = EXCLUDED.max_attempts,
                min_backoff_seconds = EXCLUDED.min_backoff_seconds,
                max_backoff_seconds = EXCLUDED.max_backoff_seconds,
                updated_at = NOW()
            "#,
        )
        .bind(&settings.name)
        .bind(settings.max_dispatches_per_second)
        .bind(settings.max_concurrent_dispatches)
        .bind(settings.retry.max_attempts)
        .bind(settings.retry.min_backoff.as_secs() as i64)
        .bind(settings.retry.max_backoff.as_secs() as i64)
        .execute(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        tracing::debug!(queue = %settings.name, "Ensured task queue");
        Ok(())
    }

    async fn enqueue(&self, task: EnrichmentTask) -> Result<Uuid> {
        let task_id = Uuid::new_v4();

        // Timestamps come from the same clock `dequeue` compares against.
        let result = sqlx::query(
            r#"
            INSERT INTO enrichment_tasks (
                id, queue_name, method, target_resource_path, headers, body, max_attempts,
                scheduled_at, created_at
            )
            SELECT $1, q.name, $3, $4, $5, $6, q.max_attempts, $7, $7
            FROM task_queues q
            WHERE q.name = $2
            "#,
        )
        .bind(task_id)
        .bind(&self.queue_name)
        .bind(&task.method)
        .bind(&task.target_resource_path)
        .bind(sqlx::types::Json(&task.headers))
        .bind(&task.body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(crate::Error::Enqueue(format!(
                "queue '{}' does not exist",
                self.queue_name
            )));
        }

        tracing::debug!(
            task_id = %task_id,
            queue = %self.queue_name,
            target = %task.target_resource_path,
            "Enqueued enrichment task"
        );
        Ok(task_id)
    }

    async fn dequeue(&self, worker_id: &str) -> Result<Option<QueuedTask>> {
        let now = Utc::now();

        // The gate takes one dispatch slot from the queue row and checks the
        // queue-wide concurrency cap; both hold across worker processes.
        // A slot is spent even when every due task is blocked on a running write.
        let sql = format!(
            r#"
            WITH gate AS (
                UPDATE task_queues q
                SET next_dispatch_at = $1 + make_interval(secs => 1.0 / q.max_dispatches_per_second)
                WHERE q.name = $3
                  AND q.next_dispatch_at <= $1
                  AND (
                      SELECT COUNT(*) FROM enrichment_tasks r
                      WHERE r.queue_name = q.name
                        AND r.status = 'running'
                  ) < q.max_concurrent_dispatches
                  AND EXISTS (
                      SELECT 1 FROM enrichment_tasks p
                      WHERE p.queue_name = q.name
                        AND p.status = 'pending'
                        AND p.scheduled_at <= $1
                  )
                RETURNING q.name
            )
            UPDATE enrichment_tasks
            SET status = 'running',
                started_at = $1,
                worker_id = $2,
                attempts = attempts + 1
            WHERE id = (
                SELECT t.id
                FROM enrichment_tasks t
                JOIN gate g ON g.name = t.queue_name
                WHERE t.status = 'pending'
                  AND t.scheduled_at <= $1
                  AND NOT EXISTS (
                      SELECT 1 FROM enrichment_tasks r
                      WHERE r.target_resource_path = t.target_resource_path
                        AND r.status = 'running'
                  )
                ORDER BY t.scheduled_at ASC, t.created_at ASC
                LIMIT 1
                FOR UPDATE OF t SKIP LOCKED
            )
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(now)
            .bind(worker_id)
            .bind(&self.queue_name)
            .fetch_optional(&self.pool)
            .await;

        let row = match row {
            Ok(row) => row,
            // Another worker claimed a task for the same resource first.
            Err(e) if is_unique_violation(&e) => {
                tracing::trace!(worker_id, "Lost race for resource; retrying later");
                return Ok(None);
            }
            Err(e) => return Err(crate::Error::Database(e)),
        };

        let task = row.map(QueuedTask::try_from).transpose()?;
        if let Some(ref task) = task {
            tracing::debug!(
                task_id = %task.id,
                attempt = task.attempts,
                worker_id,
                "Dequeued enrichment task"
            );
        }
        Ok(task)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<QueuedTask>> {
        let sql = format!("SELECT {} FROM enrichment_tasks WHERE id = $1", TASK_COLUMNS);
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(crate::Error::Database)?;

        row.map(QueuedTask::try_from).transpose()
    }

    async fn complete_task(&self, task_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE enrichment_tasks
            SET status = 'completed',
                completed_at = $1
            WHERE id = $2
            "#,
        )
        .bind(Utc::now())
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        tracing::debug!(task_id = %task_id, "Enrichment task completed");
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

        let Some(task) = self.get_task(task_id).await? else {
            tracing::warn!(task_id = %task_id, "Cannot fail unknown task");
            return Ok(());
        };

        if retry && task.can_retry() {
            let policy = self.retry_policy(&task.queue_name).await?;
            let delay =
                policy.time_until_next_retry(task.attempts.max(1) as u32, retry_after);
            let scheduled_at = now
                + chrono::Duration::from_std(delay)
                    .map_err(|e| crate::Error::Internal(format!("Invalid retry delay: {}", e)))?;

            sqlx::query(
                r#"
                UPDATE enrichment_tasks
                SET status = 'pending',
                    last_error = $1,
                    scheduled_at = $2,
                    started_at = NULL,
                    worker_id = NULL
                WHERE id = $3
                "#,
            )
            .bind(&error_message)
            .bind(scheduled_at)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(crate::Error::Database)?;

            tracing::warn!(
                task_id = %task_id,
                attempt = task.attempts,
                retry_at = %scheduled_at,
                error = %error_message,
                "Enrichment task failed, scheduled for retry"
            );
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE enrichment_tasks
            SET status = 'failed',
                completed_at = $1,
                last_error = $2
            WHERE id = $3
            "#,
        )
        .bind(now)
        .bind(&error_message)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        tracing::error!(
            task_id = %task_id,
            attempt = task.attempts,
            target = %task.task.target_resource_path,
            error = %error_message,
            "Enrichment task failed permanently"
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<serde_json::Value> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'running') as running,
                COUNT(*) FILTER (WHERE status = 'completed') as completed,
                COUNT(*) FILTER (WHERE status = 'failed') as failed
            FROM enrichment_tasks
            WHERE queue_name = $1
              AND created_at > NOW() - INTERVAL '24 hours'
            "#,
        )
        .bind(&self.queue_name)
        .fetch_one(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        let total: i64 = row.try_get("total").unwrap_or(0);
        let pending: i64 = row.try_get("pending").unwrap_or(0);
        let running: i64 = row.try_get("running").unwrap_or(0);
        let completed: i64 = row.try_get("completed").unwrap_or(0);
        let failed: i64 = row.try_get("failed").unwrap_or(0);

        Ok(serde_json::json!({
            "status": "ok",
            "backend": "postgres",
            "queue": self.queue_name,
            "stats_24h": {
                "total": total,
                "pending": pending,
                "running": running,
                "completed": completed,
                "failed": failed
            }
        }))
    }

    async fn cleanup_completed(&self, days: i32) -> Result<i64> {
        let result = sqlx::query(
            r#"
            DELETE FROM enrichment_tasks
            WHERE queue_name = $1
              AND status IN ('completed', 'failed')
              AND completed_at < NOW() - ($2 || ' days')::INTERVAL
            "#,
        )
        .bind(&self.queue_name)
        .bind(days.to_string())
        .execute(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        let deleted = result.rows_affected() as i64;
        tracing::info!(deleted, days, "Cleaned up finished enrichment tasks");
        Ok(deleted)
    }
}
