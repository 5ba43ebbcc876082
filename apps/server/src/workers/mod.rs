//! Background enrichment worker
//!
//! Drains the task queue at a bounded rate with bounded concurrency. Runs
//! inside the server (`workers.embedded`) or as the `ingest-worker` binary.

mod enrichment_worker;
mod state;

pub use enrichment_worker::{parse_retry_after_header, DeliveryResult, EnrichmentWorker};
pub use state::WorkerState;

use crate::{config::Config, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Scheduling knobs for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerRunnerConfig {
    /// Minimum spacing between two dispatches.
    pub dispatch_interval: Duration,
    pub max_concurrent_dispatches: usize,
    /// Sleep when the queue has nothing due.
    pub idle_poll_interval: Duration,
}

impl WorkerRunnerConfig {
    pub fn from_config(config: &Config) -> Self {
        let rate = config.queue.max_dispatches_per_second.max(f64::MIN_POSITIVE);
        Self {
            dispatch_interval: Duration::from_secs_f64((1.0 / rate).min(3600.0)),
            max_concurrent_dispatches: config.queue.max_concurrent_dispatches.max(1),
            idle_poll_interval: Duration::from_secs(config.workers.poll_interval_seconds.max(1)),
        }
    }
}

/// Spawn the worker loop. It stops when `shutdown_rx` flips to true, after
/// in-flight deliveries finish.
pub fn spawn_enrichment_worker(
    worker: EnrichmentWorker,
    config: WorkerRunnerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let worker = Arc::new(worker);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_dispatches));
        let mut ticker = tokio::time::interval(config.dispatch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            worker_id = worker.worker_id(),
            dispatch_interval_ms = config.dispatch_interval.as_millis() as u64,
            max_concurrent = config.max_concurrent_dispatches,
            "Enrichment worker started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let task = match worker.queue().dequeue(worker.worker_id()).await {
                Ok(task) => task,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to dequeue enrichment task");
                    None
                }
            };

            let Some(task) = task else {
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(config.idle_poll_interval) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            };

            let worker = worker.clone();
            tokio::spawn(async move {
                let task_id = task.id;
                if let Err(e) = worker.process_task(task).await {
                    tracing::error!(task_id = %task_id, error = %e, "Failed to record task result");
                }
                drop(permit);
            });
        }

        // Wait for in-flight deliveries.
        let total = u32::try_from(config.max_concurrent_dispatches).unwrap_or(u32::MAX);
        let _ = permits.acquire_many(total).await;
        tracing::info!(worker_id = worker.worker_id(), "Enrichment worker stopped");
        Ok(())
    })
}

/// Build the worker for `state` and spawn it.
pub fn spawn_from_state(
    state: &WorkerState,
    worker_id: impl Into<String>,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<Result<()>> {
    let worker = EnrichmentWorker::new(state.task_queue.clone(), state.http.clone(), worker_id);
    spawn_enrichment_worker(
        worker,
        WorkerRunnerConfig::from_config(&state.config),
        shutdown_rx,
    )
}
