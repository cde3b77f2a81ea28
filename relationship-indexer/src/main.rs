//! Relationship Indexer Main Entry Point
//!
//! Consumes relationship events from Kafka, keeps the social graph up to date
//! in PostgreSQL and checkpoints every partition it processes.

use dotenv::dotenv;
use relationship_indexer::config::ProcessorConfig;
use relationship_indexer::telemetry::init_tracing;
use relationship_indexer::{Dependencies, IndexingError};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Resolve once SIGINT (or SIGTERM on unix) is received.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), IndexingError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing("relationship-indexer")?;

    info!("Starting relationship indexer");

    let config = ProcessorConfig::from_env();

    let mut deps = match Dependencies::new(&config).await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    match deps.processor.run(shutdown_rx).await {
        Ok(()) => {
            info!("Relationship indexer stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Relationship indexer failed");
            Err(e.into())
        }
    }
}
