//! Ingestion server entry point
//!
//! Serves the storage notification trigger. When `workers.embedded` is true
//! (the default) the enrichment worker runs in-process; otherwise run the
//! `ingest-worker` binary next to it.

use anyhow::Context;
use fhirstore_ingest::{
    api::create_router,
    config::Config,
    logging,
    state::AppState,
    workers::{spawn_from_state, WorkerState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first to get logging settings
    let config = Config::load().context("Failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _logging_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.logging.deployment_environment,
        "Starting ingestion server"
    );

    let addr = config
        .socket_addr()
        .context("Failed to determine socket address")?;

    tracing::info!(
        project = %config.gcp.project_id,
        dataset = %config.healthcare.dataset_id,
        queue = %config.queue.name,
        listen_addr = %addr,
        "Configuration loaded"
    );

    let state = AppState::new(config.clone())
        .await
        .context("Failed to initialize application state")?;

    let embedded_worker = if config.workers.enabled && config.workers.embedded {
        let worker_state = WorkerState::with_queue(state.config.clone(), state.task_queue.clone())
            .context("Failed to initialize embedded worker state")?;
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = spawn_from_state(&worker_state, "embedded-worker", shutdown_rx);
        tracing::info!("Embedded enrichment worker started");
        Some((shutdown_tx, handle))
    } else {
        if !config.workers.embedded {
            tracing::info!("Embedded worker disabled; use the separate ingest-worker binary");
        }
        None
    };

    let app = create_router(state);

    tracing::info!("Ingestion server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind TCP listener on {addr}"))?;

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server terminated unexpectedly");
    }

    if let Some((shutdown_tx, handle)) = embedded_worker {
        tracing::info!("Stopping embedded worker...");
        let _ = shutdown_tx.send(true);
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Embedded worker ended with error: {}", e),
            Err(e) => tracing::error!("Embedded worker task join error: {}", e),
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
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
            tracing::info!("SIGINT received, starting graceful shutdown...");
        }
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received, starting graceful shutdown...");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
