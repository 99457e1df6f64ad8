//! Conversion service process.
//!
//! Wires the PostgreSQL record store and queue, the local blob store and
//! the LibreOffice converter into a [`JobOrchestrator`], then runs the
//! worker loops and the recovery sweep until SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use docshift_db::{PgRecordStore, PgTaskQueue};
use docshift_pipeline::libreoffice::LibreOfficeConverter;
use docshift_pipeline::storage::LocalBlobStore;
use docshift_pipeline::{JobOrchestrator, PipelineConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Extra time granted to in-flight conversions on shutdown.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = PipelineConfig::from_env().context("Invalid configuration")?;
    init_tracing(config.json_logs);

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = docshift_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    docshift_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    docshift_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let blobs = Arc::new(
        LocalBlobStore::new(&config.storage_root).context("Failed to open blob storage")?,
    );
    let converter = Arc::new(LibreOfficeConverter::new(
        config.libreoffice_bin.clone(),
        config.output_extension.clone(),
        blobs.clone(),
        config.storage_root.join(".scratch"),
    ));
    tracing::info!(
        storage_root = %config.storage_root.display(),
        engine = %config.libreoffice_bin,
        "Storage and converter ready",
    );

    let drain_timeout = config.conversion_timeout + SHUTDOWN_SLACK;
    let orchestrator = JobOrchestrator::new(
        config.clone(),
        Arc::new(PgRecordStore::new(pool.clone())),
        Arc::new(PgTaskQueue::new(pool.clone(), config.queue_lease)),
        blobs,
        converter,
    );

    let cancel = CancellationToken::new();
    let mut loops = orchestrator.spawn(cancel.clone());
    tracing::info!(
        workers = config.worker_concurrency,
        max_attempts = config.retry.max_attempts,
        timeout_secs = config.conversion_timeout.as_secs(),
        "Conversion service started",
    );

    shutdown_signal().await;

    // --- Post-shutdown cleanup ---

    cancel.cancel();
    let drained = tokio::time::timeout(drain_timeout, async {
        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Background loop panicked");
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("In-flight conversions did not finish in time; leaving them to the recovery sweep");
        loops.abort_all();
    }

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docshift_worker=debug,docshift_pipeline=debug,docshift_db=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
