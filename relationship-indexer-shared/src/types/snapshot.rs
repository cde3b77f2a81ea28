//! Point-in-time graph captures and bulk backfill progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user_node::PersistableUserNode;

/// Full copy of the graph at one instant. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSnapshot {
    pub timestamp: DateTime<Utc>,
    pub users: Vec<PersistableUserNode>,
}

impl GraphSnapshot {
    pub fn new(timestamp: DateTime<Utc>, users: Vec<PersistableUserNode>) -> Self {
        Self { timestamp, users }
    }

    pub fn user(&self, name: &str) -> Option<&PersistableUserNode> {
        self.users.iter().find(|u| u.name == name)
    }
}

/// Resumable cursor of the bulk raw-event backfill.
///
/// Independent from the stream processor's per-partition checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillProgress {
    /// Total number of stored events counted at the last run.
    pub total: u64,
    /// Number of full pages already written.
    pub pages: u64,
    pub page_size: u64,
}

impl BackfillProgress {
    /// Number of events covered by the completed pages.
    pub fn resume_from(&self) -> u64 {
        self.pages * self.page_size
    }
}
