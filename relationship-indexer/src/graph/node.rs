use std::collections::BTreeSet;

use relationship_indexer_shared::PersistableUserNode;

/// Live, mutable user record owned by the graph engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNode {
    pub name: String,
    /// Set on the first accepted register, never overwritten.
    pub created_at: Option<String>,
    /// Set by the first accepted referral naming this user, never changed.
    pub referred_by: Option<String>,
    pub referrals: BTreeSet<String>,
    pub friends: BTreeSet<String>,
    pub referral_points: i64,
    /// Highest sequence number applied to this node, -1 if none.
    pub last_seq: i64,
    pub referrals_count: usize,
    pub friends_count: usize,
}

impl UserNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: None,
            referred_by: None,
            referrals: BTreeSet::new(),
            friends: BTreeSet::new(),
            referral_points: 0,
            last_seq: -1,
            referrals_count: 0,
            friends_count: 0,
        }
    }

    /// Recompute the cached cardinalities from the live sets.
    pub fn refresh_counts(&mut self) {
        self.referrals_count = self.referrals.len();
        self.friends_count = self.friends.len();
    }

    /// Projection carrying the cached counts as they currently stand.
    pub fn to_persistable(&self) -> PersistableUserNode {
        PersistableUserNode {
            name: self.name.clone(),
            created_at: self.created_at.clone(),
            referred_by: self.referred_by.clone(),
            referrals: self.referrals.iter().cloned().collect(),
            friends: self.friends.iter().cloned().collect(),
            referral_points: self.referral_points,
            last_seq: self.last_seq,
            referrals_count: self.referrals_count,
            friends_count: self.friends_count,
        }
    }
}

impl From<PersistableUserNode> for UserNode {
    fn from(doc: PersistableUserNode) -> Self {
        Self {
            name: doc.name,
            created_at: doc.created_at,
            referred_by: doc.referred_by,
            referrals: doc.referrals.into_iter().collect(),
            friends: doc.friends.into_iter().collect(),
            referral_points: doc.referral_points,
            last_seq: doc.last_seq,
            referrals_count: doc.referrals_count,
            friends_count: doc.friends_count,
        }
    }
}
