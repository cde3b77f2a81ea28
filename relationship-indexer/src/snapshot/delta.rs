//! Rankings computed between two graph captures.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use relationship_indexer_shared::GraphSnapshot;

pub const DEFAULT_LEADERBOARD_COUNT: usize = 10;

/// One ranked user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub value: i64,
}

impl LeaderboardEntry {
    fn new(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

/// Both rankings between the captures closest to the requested bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    /// Referral points gained between the two captures.
    pub referral_points: Vec<LeaderboardEntry>,
    /// Network strength in the later capture.
    pub network_strength: Vec<LeaderboardEntry>,
}

/// Rank every user of `later` by referral points gained since `earlier` and
/// by network strength. Each ranking is sorted by value descending, then by
/// name ascending, and truncated to `count` entries.
pub fn compute_leaderboard(
    earlier: &GraphSnapshot,
    later: &GraphSnapshot,
    count: usize,
) -> Leaderboard {
    let before: HashMap<&str, i64> = earlier
        .users
        .iter()
        .map(|user| (user.name.as_str(), user.referral_points))
        .collect();

    let mut referral_points: Vec<LeaderboardEntry> = later
        .users
        .iter()
        .map(|user| {
            let previous = before.get(user.name.as_str()).copied().unwrap_or(0);
            LeaderboardEntry::new(&user.name, user.referral_points - previous)
        })
        .collect();

    let mut network_strength: Vec<LeaderboardEntry> = later
        .users
        .iter()
        .map(|user| LeaderboardEntry::new(&user.name, user.network_strength()))
        .collect();

    rank(&mut referral_points, count);
    rank(&mut network_strength, count);

    Leaderboard {
        start_timestamp: earlier.timestamp,
        end_timestamp: later.timestamp,
        referral_points,
        network_strength,
    }
}

fn rank(entries: &mut Vec<LeaderboardEntry>, count: usize) {
    entries.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(count);
}
