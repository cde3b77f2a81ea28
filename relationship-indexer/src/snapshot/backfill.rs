//! Copies the durable raw event log into page files.
//!
//! Progress is tracked in full pages, so a repeated run continues after the
//! last full page instead of starting over. A trailing partial page is
//! written but read again by the next run.
//!
//! File writes run on `block_in_place`, so callers need the multi-thread
//! runtime.

use tokio::time::Instant;
use tracing::{info, instrument};

use super::store::SnapshotStore;
use crate::errors::SnapshotError;
use relationship_indexer_repository::PersistenceGateway;
use relationship_indexer_shared::BackfillProgress;

/// What one backfill run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillSummary {
    /// Events in the log when the run started.
    pub total: u64,
    /// Log index the run resumed from.
    pub resumed_from: u64,
    pub events_written: u64,
    pub pages_written: u64,
    pub progress: BackfillProgress,
}

/// Page through the raw event log from the last completed page onwards.
///
/// `page_size` only applies to a fresh backfill; a resumed one keeps the page
/// size it was started with so that page boundaries stay stable.
#[instrument(skip(gateway, store), fields(dir = %store.dir().display()))]
pub async fn backfill(
    gateway: &dyn PersistenceGateway,
    store: &SnapshotStore,
    page_size: u64,
) -> Result<BackfillSummary, SnapshotError> {
    let started = Instant::now();

    let total = gateway.count_raw_events().await?;
    info!(total = total, "Counted stored events");

    let previous = store.read_progress()?;
    let page_size = previous.map(|p| p.page_size).unwrap_or(page_size).max(1);
    let mut progress = BackfillProgress {
        total,
        pages: previous.map(|p| p.pages).unwrap_or(0),
        page_size,
    };
    let resumed_from = progress.resume_from();

    if resumed_from >= total {
        info!(resumed_from = resumed_from, total = total, "Nothing to write, already in sync");
        store.write_progress(&progress)?;
        return Ok(BackfillSummary {
            total,
            resumed_from,
            events_written: 0,
            pages_written: 0,
            progress,
        });
    }

    info!(resumed_from = resumed_from, page_size = page_size, "Resuming backfill");

    let mut next = resumed_from;
    let mut events_written = 0;
    let mut pages_written = 0;

    loop {
        let page = gateway.load_raw_events_page(next, page_size).await?;
        if page.is_empty() {
            break;
        }

        let count = page.len() as u64;
        let path = tokio::task::block_in_place(|| store.write_page(next, &page))?;
        info!(path = %path.display(), events = count, "Wrote page");

        events_written += count;
        pages_written += 1;
        next += count;

        if count < page_size {
            break;
        }
        progress.pages += 1;
    }

    tokio::task::block_in_place(|| store.write_progress(&progress))?;

    info!(
        events_written = events_written,
        pages_written = pages_written,
        completed_pages = progress.pages,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Backfill finished"
    );

    Ok(BackfillSummary {
        total,
        resumed_from,
        events_written,
        pages_written,
        progress,
    })
}
