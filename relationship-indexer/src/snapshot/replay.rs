//! Replays the backfilled event log into timestamped graph captures.

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::store::{dedup_and_order, SnapshotStore};
use crate::errors::SnapshotError;
use crate::graph::GraphEngine;
use relationship_indexer_shared::{ConnectionEvent, GraphSnapshot, SequencedEvent};

/// Counters of one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records read from the page files, duplicates included.
    pub records_read: usize,
    /// Records handed to the graph engine.
    pub replayed: usize,
    /// Records the graph engine applied.
    pub applied: usize,
    /// Records dropped for an unreadable payload or timestamp.
    pub skipped: usize,
    pub captures_written: usize,
    pub captures_present: usize,
    pub first_record_time: Option<DateTime<Utc>>,
    pub last_record_time: Option<DateTime<Utc>>,
}

/// Replay every stored page through a fresh graph engine.
///
/// Whenever the payload time of a record reaches the next interval boundary,
/// the graph is captured at that boundary before the record is applied. One
/// capture is also taken right after the first record and one after the last.
/// The store's coverage is set to the first and last record times.
#[instrument(skip(store), fields(dir = %store.dir().display()))]
pub fn replay(
    store: &mut SnapshotStore,
    interval_ms: i64,
    referral_point_depth: usize,
) -> Result<ReplaySummary, SnapshotError> {
    let interval_ms = interval_ms.max(1);

    let read_started = Instant::now();
    let records = store.read_pages()?;
    let mut summary = ReplaySummary {
        records_read: records.len(),
        ..ReplaySummary::default()
    };
    let records = dedup_and_order(records);
    let read_ms = read_started.elapsed().as_millis() as u64;

    info!(
        records_read = summary.records_read,
        unique = records.len(),
        read_ms = read_ms,
        "Loaded stored events"
    );

    let ingest_started = Instant::now();
    let mut graph = GraphEngine::with_referral_point_depth(referral_point_depth);
    let mut next_boundary: Option<i64> = None;

    for record in records {
        let event: ConnectionEvent = match serde_json::from_value(record.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(partition = record.partition, offset = record.offset, error = %e, "Skipping unreadable payload");
                summary.skipped += 1;
                continue;
            }
        };

        let Some(timestamp) = event.event_timestamp() else {
            warn!(
                partition = record.partition,
                offset = record.offset,
                created_at = ?event.created_at(),
                "Skipping record with invalid timestamp"
            );
            summary.skipped += 1;
            continue;
        };
        let millis = timestamp.timestamp_millis();

        if let Some(boundary) = next_boundary.as_mut() {
            while millis >= *boundary {
                if let Some(at) = DateTime::<Utc>::from_timestamp_millis(*boundary) {
                    capture(store, &graph, at, &mut summary)?;
                }
                *boundary += interval_ms;
            }
        }

        summary.replayed += 1;
        let result = graph.ingest(&SequencedEvent::new(record.seq, event));
        if result.applied {
            summary.applied += 1;
        } else {
            debug!(offset = record.offset, seq = record.seq, "Event not applied");
        }

        if summary.first_record_time.is_none() {
            summary.first_record_time = Some(timestamp);
            capture(store, &graph, timestamp, &mut summary)?;
            next_boundary = Some(millis - millis.rem_euclid(interval_ms) + interval_ms);
        }
        summary.last_record_time = Some(timestamp);
    }

    if let Some(last) = summary.last_record_time {
        capture(store, &graph, last, &mut summary)?;
    }

    store.set_coverage(summary.first_record_time, summary.last_record_time);

    info!(
        replayed = summary.replayed,
        applied = summary.applied,
        skipped = summary.skipped,
        captures_written = summary.captures_written,
        captures_present = summary.captures_present,
        users = graph.len(),
        ingest_ms = ingest_started.elapsed().as_millis() as u64,
        "Replay finished"
    );

    Ok(summary)
}

fn capture(
    store: &SnapshotStore,
    graph: &GraphEngine,
    at: DateTime<Utc>,
    summary: &mut ReplaySummary,
) -> Result<(), SnapshotError> {
    let snapshot = GraphSnapshot::new(at, graph.snapshot());
    if store.write_snapshot(&snapshot)? {
        debug!(at = %at, users = snapshot.users.len(), "Capture saved");
        summary.captures_written += 1;
    } else {
        summary.captures_present += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::naming::snapshot_file_name;
    use chrono::TimeZone;
    use relationship_indexer_shared::StoredEvent;
    use serde_json::json;

    fn record(offset: i64, payload: serde_json::Value) -> StoredEvent {
        StoredEvent {
            topic: "relationship-events".to_string(),
            partition: 0,
            offset,
            seq: offset,
            event_type: payload["type"].as_str().unwrap_or("unknown").to_string(),
            event_timestamp: None,
            ingested_at: Utc::now(),
            payload,
        }
    }

    fn register(offset: i64, name: &str, created_at: &str) -> StoredEvent {
        record(offset, json!({ "type": "register", "name": name, "created_at": created_at }))
    }

    #[test]
    fn test_boundary_captures() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();
        store
            .write_page(
                0,
                &[
                    register(0, "alice", "2024-01-01T00:00:01.000Z"),
                    register(1, "bob", "2024-01-01T00:00:04.000Z"),
                    register(2, "carol", "2024-01-01T00:00:11.500Z"),
                ],
            )
            .unwrap();

        let summary = replay(&mut store, 5000, 2).unwrap();

        assert_eq!(summary.replayed, 3);
        assert_eq!(summary.applied, 3);
        // first record, boundaries at :05 and :10, last record
        assert_eq!(summary.captures_written, 4);

        let at = |ms: i64| Utc.timestamp_millis_opt(1_704_067_200_000 + ms).unwrap();
        let users_at = |ms: i64| {
            let path = dir.path().join(snapshot_file_name(at(ms)));
            store.load_snapshot(&path).unwrap().users.len()
        };
        assert_eq!(users_at(1000), 1);
        assert_eq!(users_at(5000), 2);
        assert_eq!(users_at(10_000), 2);
        assert_eq!(users_at(11_500), 3);

        let coverage = store.coverage();
        assert_eq!(coverage.first_snapshot_time, Some(at(1000)));
        assert_eq!(coverage.last_snapshot_time, Some(at(11_500)));
    }

    #[test]
    fn test_invalid_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();
        store
            .write_page(
                0,
                &[
                    register(0, "alice", "yesterday"),
                    record(1, json!({ "type": "block", "user": "mallory" })),
                    record(2, json!({ "type": "register" })),
                    register(3, "bob", "2024-01-01T00:00:02.000Z"),
                ],
            )
            .unwrap();

        let summary = replay(&mut store, 5000, 2).unwrap();

        assert_eq!(summary.records_read, 4);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.replayed, 1);
        // the first and the last capture share one instant
        assert_eq!(summary.captures_written, 1);
        assert_eq!(summary.captures_present, 1);
    }

    #[test]
    fn test_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();

        let summary = replay(&mut store, 5000, 2).unwrap();

        assert_eq!(summary, ReplaySummary::default());
        assert!(store.list_snapshots().unwrap().is_empty());
        assert_eq!(store.coverage().first_snapshot_time, None);
    }
}
