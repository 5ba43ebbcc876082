//! Lightweight state for the enrichment worker
//!
//! The worker only needs the queue and an HTTP transport; it never touches
//! object storage or the failure topic.

use crate::{
    clients::GcpHttp,
    config::{Config, QueueBackend},
    queue::{MemoryTaskQueue, PostgresTaskQueue, QueueSettings, TaskQueue},
    Result,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct WorkerState {
    pub config: Arc<Config>,
    pub task_queue: Arc<dyn TaskQueue>,
    pub http: GcpHttp,
}

impl WorkerState {
    /// Connect to the queue database and run migrations.
    pub async fn new(config: Config) -> Result<Self> {
        tracing::info!("Initializing worker state...");

        let task_queue: Arc<dyn TaskQueue> = match config.queue.backend {
            QueueBackend::Postgres => {
                let pool = crate::state::create_db_pool(&config).await?;
                crate::state::run_migrations(&pool).await?;
                Arc::new(PostgresTaskQueue::new(pool, config.queue.name.clone()))
            }
            QueueBackend::Memory => {
                tracing::warn!(
                    "queue.backend is memory; a standalone worker cannot see tasks enqueued by the server"
                );
                Arc::new(MemoryTaskQueue::new(config.queue.name.clone()))
            }
        };

        // Make sure the queue row exists so retry settings are readable before
        // the first dispatch.
        task_queue
            .ensure_queue(&QueueSettings::from_config(&config.queue))
            .await?;

        let http = GcpHttp::from_config(&config)?;

        tracing::info!(queue = %config.queue.name, "Worker state initialized");

        Ok(Self {
            config: Arc::new(config),
            task_queue,
            http,
        })
    }

    /// Reuse an existing queue, e.g. the server's in-memory queue.
    pub fn with_queue(config: Arc<Config>, task_queue: Arc<dyn TaskQueue>) -> Result<Self> {
        let http = GcpHttp::from_config(&config)?;
        Ok(Self {
            config,
            task_queue,
            http,
        })
    }
}
