//! Snapshot job entry point.
//!
//! Backfills the stored relationship events into page files, then replays
//! them into point-in-time graph captures.

use dotenv::dotenv;
use relationship_indexer::config::{connect_gateway, SnapshotConfig};
use relationship_indexer::snapshot::{backfill, replay, SnapshotStore};
use relationship_indexer::telemetry::init_tracing;
use relationship_indexer::IndexingError;
use relationship_indexer_repository::PersistenceGateway;
use tokio::time::Instant;
use tracing::{error, info};

async fn run(config: &SnapshotConfig, gateway: &dyn PersistenceGateway) -> Result<(), IndexingError> {
    let mut store = SnapshotStore::open(&config.snapshot_dir)?;

    let started = Instant::now();
    let backfilled = backfill(gateway, &store, config.page_size).await?;
    info!(
        total = backfilled.total,
        events_written = backfilled.events_written,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Sync finished"
    );

    let started = Instant::now();
    let replayed = tokio::task::block_in_place(|| {
        replay(&mut store, config.interval_ms, config.referral_point_depth)
    })?;
    info!(
        records_read = replayed.records_read,
        applied = replayed.applied,
        captures_written = replayed.captures_written,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Read + ingest finished"
    );

    let coverage = store.coverage();
    info!(
        first_snapshot_time = ?coverage.first_snapshot_time,
        last_snapshot_time = ?coverage.last_snapshot_time,
        "Snapshot coverage"
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), IndexingError> {
    dotenv().ok();

    init_tracing("relationship-snapshot")?;

    let config = SnapshotConfig::from_env();
    info!(
        snapshot_dir = %config.snapshot_dir.display(),
        interval_ms = config.interval_ms,
        page_size = config.page_size,
        "Starting snapshot job"
    );

    let gateway = connect_gateway(&config.database).await?;
    let result = run(&config, &gateway).await;
    gateway.close().await;

    if let Err(e) = &result {
        error!(error = %e, "Snapshot job failed");
    }
    result
}
