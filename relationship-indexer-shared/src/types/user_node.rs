//! Persisted projection of a user node and the outcome of applying an event.

use serde::{Deserialize, Serialize};

fn default_last_seq() -> i64 {
    -1
}

/// Flattened, immutable view of a user node.
///
/// This is what the store and the snapshot files see. Set-valued fields are
/// emitted as sorted sequences so that two projections of the same state are
/// always byte-for-byte identical once serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistableUserNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<String>,
    #[serde(default)]
    pub referrals: Vec<String>,
    #[serde(default)]
    pub friends: Vec<String>,
    #[serde(default)]
    pub referral_points: i64,
    #[serde(default = "default_last_seq")]
    pub last_seq: i64,
    #[serde(default)]
    pub referrals_count: usize,
    #[serde(default)]
    pub friends_count: usize,
}

impl PersistableUserNode {
    /// A node with no relationships and no applied events.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: None,
            referred_by: None,
            referrals: Vec::new(),
            friends: Vec::new(),
            referral_points: 0,
            last_seq: default_last_seq(),
            referrals_count: 0,
            friends_count: 0,
        }
    }

    /// friends + referrals + 1 if the user was referred.
    pub fn network_strength(&self) -> i64 {
        let referred = if self.referred_by.is_some() { 1 } else { 0 };
        (self.friends.len() + self.referrals.len()) as i64 + referred
    }
}

/// Outcome of applying one event to the graph.
///
/// Rejections are ordinary values: `applied == false` with no touched nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestResult {
    pub applied: bool,
    /// Names of nodes mutated (or whose `last_seq` advanced), in event order.
    pub touched: Vec<String>,
}

impl IngestResult {
    pub fn rejected() -> Self {
        Self::default()
    }

    pub fn applied(touched: Vec<String>) -> Self {
        Self {
            applied: true,
            touched,
        }
    }
}
