//! Enrichment worker entry point
//!
//! Drains the Postgres task queue and writes the tagged resources back to the
//! FHIR stores. Use with `workers.embedded = false` on the server.

use anyhow::Context;
use fhirstore_ingest::{
    config::Config,
    logging,
    workers::{spawn_from_state, WorkerState},
};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _logging_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.logging.deployment_environment,
        "Starting enrichment worker"
    );

    if !config.workers.enabled {
        tracing::warn!("Workers are disabled in configuration");
        return Ok(());
    }

    if config.workers.embedded {
        tracing::warn!(
            "workers.embedded is true; the server is already running a worker. \
             Set workers.embedded=false when using this binary."
        );
    }

    tracing::info!(
        queue = %config.queue.name,
        max_dispatches_per_second = config.queue.max_dispatches_per_second,
        max_concurrent_dispatches = config.queue.max_concurrent_dispatches,
        "Worker configuration loaded"
    );

    // Retry on DB connectivity errors so the worker survives a slow database start.
    let state = init_worker_state_with_retry(&config).await?;

    let worker_id = format!("worker-{}", Uuid::new_v4());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = spawn_from_state(&state, worker_id.clone(), shutdown_rx);

    tracing::info!(worker_id = %worker_id, "Worker running. Press Ctrl+C to stop.");

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    match handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Worker task ended with error: {}", e),
        Err(e) => tracing::error!("Worker task join error: {}", e),
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}

async fn init_worker_state_with_retry(config: &Config) -> anyhow::Result<WorkerState> {
    let initial = Duration::from_secs(config.workers.reconnect_initial_seconds.max(1));
    let max = Duration::from_secs(config.workers.reconnect_max_seconds.max(1));
    let jitter_ratio = config.workers.reconnect_jitter_ratio;

    let mut retry_delay = initial;
    loop {
        match WorkerState::new(config.clone()).await {
            Ok(state) => return Ok(state),
            Err(fhirstore_ingest::Error::Database(e)) => {
                tracing::error!(
                    "Failed to initialize worker state (db unavailable): {} (retrying in {:?})",
                    e,
                    retry_delay
                );
                sleep(jittered_duration(retry_delay, jitter_ratio)).await;
                retry_delay = (retry_delay * 2).min(max);
            }
            Err(e) => return Err(anyhow::anyhow!(e)).context("Failed to initialize worker state"),
        }
    }
}

fn jittered_duration(base: Duration, jitter_ratio: f64) -> Duration {
    if base.is_zero() || jitter_ratio <= 0.0 {
        return base;
    }

    let bytes = *Uuid::new_v4().as_bytes();
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    let unit = (u64::from_le_bytes(head) as f64) / (u64::MAX as f64); // [0,1]
    let signed = unit * 2.0 - 1.0; // [-1,1]
    let factor = (1.0 + signed * jitter_ratio).max(0.0);
    base.mul_f64(factor)
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, stopping worker...");
        }
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received, stopping worker...");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
    }
    tracing::info!("Shutdown signal received, stopping worker...");
}
