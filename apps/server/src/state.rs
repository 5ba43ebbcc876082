//! Shared application state

use crate::{
    clients::{
        FhirStoreApi, GcpHttp, GcsClient, HealthcareClient, LogOnlyBus, MessageBus, ObjectStore,
        PubSubClient,
    },
    config::{Config, QueueBackend},
    queue::{MemoryTaskQueue, PostgresTaskQueue, QueueSettings, TaskQueue},
    services::{EnrichmentDispatcher, FailureReporter, ImportOrchestrator, IngestService},
    Result,
};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AppStateOptions {
    pub run_migrations: bool,
}

impl Default for AppStateOptions {
    fn default() -> Self {
        Self {
            run_migrations: true,
        }
    }
}

/// External collaborators of the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn ObjectStore>,
    pub fhir_store: Arc<dyn FhirStoreApi>,
    pub bus: Arc<dyn MessageBus>,
    pub task_queue: Arc<dyn TaskQueue>,
}

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db_pool: Option<PgPool>,
    pub task_queue: Arc<dyn TaskQueue>,
    pub ingest_service: Arc<IngestService>,
}

impl AppState {
    /// Initialize the application state
    pub async fn new(config: Config) -> Result<Self> {
        Self::new_with_options(config, AppStateOptions::default()).await
    }

    pub async fn new_with_options(config: Config, options: AppStateOptions) -> Result<Self> {
        tracing::info!("Initializing application state...");

        let (db_pool, task_queue): (Option<PgPool>, Arc<dyn TaskQueue>) =
            match config.queue.backend {
                QueueBackend::Postgres => {
                    let pool = create_db_pool(&config).await?;
                    if options.run_migrations {
                        run_migrations(&pool).await?;
                    }
                    let queue = PostgresTaskQueue::new(pool.clone(), config.queue.name.clone());
                    (Some(pool), Arc::new(queue))
                }
                QueueBackend::Memory => {
                    tracing::warn!("Using in-memory task queue; queued tasks are lost on restart");
                    (None, Arc::new(MemoryTaskQueue::new(config.queue.name.clone())))
                }
            };

        let http = GcpHttp::from_config(&config)?;
        let storage: Arc<dyn ObjectStore> =
            Arc::new(GcsClient::new(http.clone(), &config.storage.base_url));
        let fhir_store: Arc<dyn FhirStoreApi> =
            Arc::new(HealthcareClient::from_config(http.clone(), &config));
        let bus: Arc<dyn MessageBus> = match &config.failures.topic {
            Some(topic) => Arc::new(PubSubClient::new(
                http,
                &config.failures.base_url,
                config.failure_project(),
                topic,
            )),
            None => {
                tracing::warn!("failures.topic is not set; failure records will only be logged");
                Arc::new(LogOnlyBus)
            }
        };

        let mut state = Self::from_parts(
            config,
            Collaborators {
                storage,
                fhir_store,
                bus,
                task_queue,
            },
        );
        state.db_pool = db_pool;

        tracing::info!("Application state initialized");
        Ok(state)
    }

    /// Wire the pipeline from explicit collaborators.
    pub fn from_parts(config: Config, parts: Collaborators) -> Self {
        let orchestrator = ImportOrchestrator::new(parts.fhir_store.clone());
        let dispatcher = EnrichmentDispatcher::new(
            parts.fhir_store,
            parts.task_queue.clone(),
            QueueSettings::from_config(&config.queue),
        );
        let reporter = FailureReporter::new(parts.bus);
        let ingest_service = IngestService::new(
            parts.storage,
            orchestrator,
            dispatcher,
            reporter,
            config.ingest.max_file_size_bytes,
        );

        Self {
            config: Arc::new(config),
            db_pool: None,
            task_queue: parts.task_queue,
            ingest_service: Arc::new(ingest_service),
        }
    }
}

pub(crate) async fn create_db_pool(config: &Config) -> Result<PgPool> {
    tracing::info!("Creating database connection pool...");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .min_connections(config.database.pool_min_size)
        .max_connections(config.database.pool_max_size)
        .acquire_timeout(std::time::Duration::from_secs(
            config.database.pool_timeout_seconds,
        ))
        .connect(&config.database.url)
        .await
        .map_err(crate::Error::Database)?;

    tracing::info!(
        min = config.database.pool_min_size,
        max = config.database.pool_max_size,
        "Database pool created"
    );
    Ok(pool)
}

pub(crate) async fn run_migrations(pool: &PgPool) -> Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| match e {
            sqlx::migrate::MigrateError::Execute(db_err) => crate::Error::Database(db_err),
            other => crate::Error::Internal(format!("Migration failed: {}", other)),
        })
}
