//! Snapshot module for the relationship indexer.
//!
//! Turns the raw event log into point-in-time graph captures:
//!
//! - [`backfill`] copies the stored log into page files, resumably
//! - [`replay`] runs the pages through a fresh graph and writes captures at
//!   fixed event-time intervals
//! - [`SnapshotStore`] finds the capture closest to a date and computes
//!   leaderboards between two captures

mod backfill;
mod delta;
pub mod naming;
mod replay;
mod store;

pub use backfill::{backfill, BackfillSummary};
pub use delta::{compute_leaderboard, Leaderboard, LeaderboardEntry, DEFAULT_LEADERBOARD_COUNT};
pub use replay::{replay, ReplaySummary};
pub use store::{SnapshotCoverage, SnapshotStore};
