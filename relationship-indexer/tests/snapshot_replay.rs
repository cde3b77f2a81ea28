//! Backfill, replay and lookup against a temporary snapshot directory.

use std::fs;

use chrono::{DateTime, Duration, TimeZone, Utc};
use relationship_indexer::snapshot::{backfill, replay, LeaderboardEntry, SnapshotStore};
use relationship_indexer_repository::{InMemoryGateway, PersistenceGateway};
use relationship_indexer_shared::StoredEvent;
use serde_json::{json, Value};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    base() + Duration::seconds(secs)
}

fn stored(offset: i64, secs: i64, mut payload: Value) -> StoredEvent {
    payload["created_at"] = json!(at(secs).format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string());
    StoredEvent {
        topic: "relationship-events".to_string(),
        partition: 0,
        offset,
        seq: offset,
        event_type: payload["type"].as_str().unwrap_or("unknown").to_string(),
        event_timestamp: Some(at(secs)),
        ingested_at: at(secs),
        payload,
    }
}

fn register(offset: i64, secs: i64, name: &str) -> StoredEvent {
    stored(offset, secs, json!({ "type": "register", "name": name }))
}

fn page_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
        .filter(|name| name.starts_with("events_"))
        .collect();
    names.sort();
    names
}

/// alice refers bob, bob refers carol, alice befriends carol.
fn network_events() -> Vec<StoredEvent> {
    vec![
        register(0, 0, "alice"),
        register(1, 1, "bob"),
        stored(2, 2, json!({ "type": "referral", "referredBy": "alice", "user": "bob" })),
        register(3, 6, "carol"),
        stored(4, 7, json!({ "type": "referral", "referredBy": "bob", "user": "carol" })),
        stored(
            5,
            12,
            json!({ "type": "addfriend", "user1_name": "alice", "user2_name": "carol" }),
        ),
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backfill_resumes_after_last_full_page() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open(dir.path()).unwrap();
    let gateway = InMemoryGateway::with_events((0..5).map(|i| register(i, i, "u")).collect());

    let first = backfill(&gateway, &store, 2).await.unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.resumed_from, 0);
    assert_eq!(first.events_written, 5);
    assert_eq!(first.pages_written, 3);
    assert_eq!(first.progress.pages, 2);

    gateway
        .append_raw_events(&[register(5, 5, "u"), register(6, 6, "u")])
        .await
        .unwrap();

    // The page size of the first run wins over the requested one.
    let second = backfill(&gateway, &store, 100).await.unwrap();
    assert_eq!(second.resumed_from, 4);
    assert_eq!(second.events_written, 3);
    assert_eq!(second.progress.page_size, 2);
    assert_eq!(second.progress.pages, 3);

    assert_eq!(
        page_files(dir.path()),
        vec![
            "events_000000000000_to_000000000001.json",
            "events_000000000002_to_000000000003.json",
            "events_000000000004_to_000000000005.json",
            "events_000000000006_to_000000000006.json",
        ]
    );
    assert_eq!(store.read_pages().unwrap().len(), 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backfill_already_in_sync() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open(dir.path()).unwrap();
    let gateway = InMemoryGateway::with_events((0..4).map(|i| register(i, i, "u")).collect());

    backfill(&gateway, &store, 2).await.unwrap();
    let again = backfill(&gateway, &store, 2).await.unwrap();

    assert_eq!(again.events_written, 0);
    assert_eq!(again.pages_written, 0);
    assert_eq!(store.read_progress().unwrap().map(|p| p.pages), Some(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replay_captures_and_leaderboard() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SnapshotStore::open(dir.path()).unwrap();
    let gateway = InMemoryGateway::with_events(network_events());

    backfill(&gateway, &store, 4).await.unwrap();
    let summary = replay(&mut store, 5000, 2).unwrap();

    assert_eq!(summary.records_read, 6);
    assert_eq!(summary.applied, 6);
    assert_eq!(summary.skipped, 0);
    // after alice, at :05, at :10 and after the last record
    assert_eq!(summary.captures_written, 4);

    let coverage = store.coverage();
    assert_eq!(coverage.first_snapshot_time, Some(at(0)));
    assert_eq!(coverage.last_snapshot_time, Some(at(12)));

    // The :05 capture predates carol.
    let at_five = store.load_snapshot_by_date(at(5)).unwrap();
    assert_eq!(at_five.timestamp, at(5));
    assert!(at_five.user("carol").is_none());
    assert_eq!(at_five.user("alice").map(|u| u.referral_points), Some(1));

    let board = store.leaderboard(at(4), at(13), 2).unwrap();
    assert_eq!(board.start_timestamp, at(5));
    assert_eq!(board.end_timestamp, at(12));
    assert_eq!(
        board.referral_points,
        vec![
            LeaderboardEntry { name: "alice".to_string(), value: 1 },
            LeaderboardEntry { name: "bob".to_string(), value: 1 },
        ]
    );
    assert_eq!(
        board.network_strength,
        vec![
            LeaderboardEntry { name: "alice".to_string(), value: 2 },
            LeaderboardEntry { name: "bob".to_string(), value: 2 },
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replay_is_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SnapshotStore::open(dir.path()).unwrap();
    let gateway = InMemoryGateway::with_events(network_events());

    backfill(&gateway, &store, 100).await.unwrap();
    let first = replay(&mut store, 5000, 2).unwrap();
    let before = store.load_snapshot_by_date(at(12)).unwrap();

    let second = replay(&mut store, 5000, 2).unwrap();
    assert_eq!(second.captures_written, 0);
    assert_eq!(second.captures_present, first.captures_written);
    assert_eq!(store.load_snapshot_by_date(at(12)).unwrap(), before);

    // A process that only reads the directory sees the same coverage.
    let mut reader = SnapshotStore::open(dir.path()).unwrap();
    assert_eq!(reader.scan_coverage().unwrap(), store.coverage());
}
