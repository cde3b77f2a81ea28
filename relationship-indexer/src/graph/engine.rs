//! In-memory materialized view of users and their relationships.
//!
//! The engine is a total function over `(state, event)`: every event either
//! applies or is rejected, and rejection is an ordinary [`IngestResult`]. The
//! event's sequence number is the only conflict-resolution key. An event is
//! dropped when any node it targets has already applied the same or a later
//! sequence number, which makes re-delivery harmless.

use std::collections::{BTreeMap, BTreeSet};

use relationship_indexer_shared::{
    ConnectionEvent, IngestResult, PersistableUserNode, SequencedEvent,
};

use super::node::UserNode;

/// Number of ancestors credited when a new referral edge appears.
pub const DEFAULT_REFERRAL_POINT_DEPTH: usize = 2;

/// The relationship graph and its dirty-node tracking.
///
/// Not synchronized: exactly one caller may mutate it at a time.
#[derive(Debug, Clone)]
pub struct GraphEngine {
    users: BTreeMap<String, UserNode>,
    dirty: BTreeSet<String>,
    referral_point_depth: usize,
}

impl Default for GraphEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphEngine {
    pub fn new() -> Self {
        Self::with_referral_point_depth(DEFAULT_REFERRAL_POINT_DEPTH)
    }

    pub fn with_referral_point_depth(referral_point_depth: usize) -> Self {
        Self {
            users: BTreeMap::new(),
            dirty: BTreeSet::new(),
            referral_point_depth,
        }
    }

    /// Apply one event.
    pub fn ingest(&mut self, sequenced: &SequencedEvent) -> IngestResult {
        let seq = sequenced.seq;
        match &sequenced.event {
            ConnectionEvent::Register { name, created_at } => {
                self.handle_register(name, created_at, seq)
            }
            ConnectionEvent::Referral {
                referred_by, user, ..
            } => self.handle_referral(referred_by, user, seq),
            ConnectionEvent::AddFriend { user1, user2, .. } => {
                self.handle_friendship(user1, user2, seq, true)
            }
            ConnectionEvent::Unfriend { user1, user2, .. } => {
                self.handle_friendship(user1, user2, seq, false)
            }
            ConnectionEvent::Unknown => IngestResult::rejected(),
        }
    }

    /// Apply events in order, returning how many were applied.
    pub fn ingest_many<'a, I>(&mut self, events: I) -> usize
    where
        I: IntoIterator<Item = &'a SequencedEvent>,
    {
        events
            .into_iter()
            .filter(|event| self.ingest(event).applied)
            .count()
    }

    /// Project every node changed since the last drain and clear the dirty set.
    ///
    /// Cached counts are recomputed on the drained nodes. A second call with
    /// no mutation in between returns an empty list.
    pub fn drain_dirty_nodes(&mut self) -> Vec<PersistableUserNode> {
        let names = std::mem::take(&mut self.dirty);
        names
            .into_iter()
            .filter_map(|name| {
                self.users.get_mut(&name).map(|node| {
                    node.refresh_counts();
                    node.to_persistable()
                })
            })
            .collect()
    }

    /// Replace the whole graph with the given projections.
    ///
    /// Loading is not a mutation: the dirty set is empty afterwards.
    pub fn hydrate(&mut self, nodes: Vec<PersistableUserNode>) {
        self.users = nodes
            .into_iter()
            .map(|doc| (doc.name.clone(), UserNode::from(doc)))
            .collect();
        self.dirty.clear();
    }

    /// Every node, sorted by name, with counts taken from the live sets.
    /// Leaves dirty tracking untouched.
    pub fn snapshot(&self) -> Vec<PersistableUserNode> {
        self.users
            .values()
            .map(|node| {
                let mut doc = node.to_persistable();
                doc.referrals_count = node.referrals.len();
                doc.friends_count = node.friends.len();
                doc
            })
            .collect()
    }

    /// Queue existing nodes for the next drain again, e.g. after their flush failed.
    pub fn mark_dirty<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if self.users.contains_key(name) {
                self.dirty.insert(name.to_string());
            }
        }
    }

    pub fn user(&self, name: &str) -> Option<&UserNode> {
        self.users.get(name)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn referral_point_depth(&self) -> usize {
        self.referral_point_depth
    }

    fn handle_register(&mut self, name: &str, created_at: &str, seq: i64) -> IngestResult {
        if !self.can_apply(&[name], seq) {
            return IngestResult::rejected();
        }

        let created_at_set = {
            let node = self.get_or_create(name);
            if node.created_at.is_none() {
                node.created_at = Some(created_at.to_string());
                true
            } else {
                false
            }
        };
        if created_at_set {
            self.dirty.insert(name.to_string());
        }

        let advanced = self.mark_applied(&[name], seq);
        if advanced || created_at_set {
            IngestResult::applied(vec![name.to_string()])
        } else {
            IngestResult::rejected()
        }
    }

    fn handle_referral(&mut self, parent: &str, child: &str, seq: i64) -> IngestResult {
        if parent == child || !self.users.contains_key(parent) || !self.users.contains_key(child)
        {
            return IngestResult::rejected();
        }
        if !self.can_apply(&[parent, child], seq) {
            return IngestResult::rejected();
        }

        let mut mutated = false;

        if let Some(child_node) = self.users.get_mut(child) {
            match child_node.referred_by.as_deref() {
                // First writer wins.
                Some(existing) if existing != parent => return IngestResult::rejected(),
                Some(_) => {}
                None => {
                    child_node.referred_by = Some(parent.to_string());
                    self.dirty.insert(child.to_string());
                    mutated = true;
                }
            }
        }

        let edge_added = self
            .users
            .get_mut(parent)
            .map(|parent_node| parent_node.referrals.insert(child.to_string()))
            .unwrap_or(false);
        if edge_added {
            self.dirty.insert(parent.to_string());
            self.propagate_referral_points(parent);
            mutated = true;
        }

        if !mutated {
            return IngestResult::rejected();
        }

        self.mark_applied(&[parent, child], seq);
        IngestResult::applied(vec![parent.to_string(), child.to_string()])
    }

    fn handle_friendship(&mut self, a: &str, b: &str, seq: i64, befriend: bool) -> IngestResult {
        if a == b || !self.users.contains_key(a) || !self.users.contains_key(b) {
            return IngestResult::rejected();
        }
        if !self.can_apply(&[a, b], seq) {
            return IngestResult::rejected();
        }

        let a_changed = self.update_friend(a, b, befriend);
        let b_changed = self.update_friend(b, a, befriend);
        if !a_changed && !b_changed {
            return IngestResult::rejected();
        }

        self.dirty.insert(a.to_string());
        self.dirty.insert(b.to_string());
        self.mark_applied(&[a, b], seq);
        IngestResult::applied(vec![a.to_string(), b.to_string()])
    }

    fn update_friend(&mut self, owner: &str, peer: &str, befriend: bool) -> bool {
        match self.users.get_mut(owner) {
            Some(node) if befriend => node.friends.insert(peer.to_string()),
            Some(node) => node.friends.remove(peer),
            None => false,
        }
    }

    /// False when any existing target already applied `seq` or later.
    fn can_apply(&self, names: &[&str], seq: i64) -> bool {
        names.iter().all(|name| {
            self.users
                .get(*name)
                .map_or(true, |node| node.last_seq < seq)
        })
    }

    /// Advance `last_seq` on every target. Returns whether any node moved.
    fn mark_applied(&mut self, names: &[&str], seq: i64) -> bool {
        let mut advanced = false;
        for name in names {
            let moved = {
                let node = self.get_or_create(name);
                if node.last_seq < seq {
                    node.last_seq = seq;
                    true
                } else {
                    false
                }
            };
            if moved {
                self.dirty.insert(name.to_string());
                advanced = true;
            }
        }
        advanced
    }

    fn get_or_create(&mut self, name: &str) -> &mut UserNode {
        if !self.users.contains_key(name) {
            self.dirty.insert(name.to_string());
        }
        self.users
            .entry(name.to_string())
            .or_insert_with(|| UserNode::new(name))
    }

    /// Flat +1 for the direct parent and each ancestor above it, up to the depth limit.
    fn propagate_referral_points(&mut self, start: &str) {
        let mut current = Some(start.to_string());
        for _ in 0..self.referral_point_depth {
            let Some(name) = current.take() else {
                break;
            };
            let Some(node) = self.users.get_mut(&name) else {
                break;
            };
            node.referral_points += 1;
            current = node.referred_by.clone();
            self.dirty.insert(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "2024-01-01T00:00:00.000Z";

    fn register(name: &str, seq: i64) -> SequencedEvent {
        SequencedEvent::new(
            seq,
            ConnectionEvent::Register {
                name: name.to_string(),
                created_at: TS.to_string(),
            },
        )
    }

    fn referral(parent: &str, child: &str, seq: i64) -> SequencedEvent {
        SequencedEvent::new(
            seq,
            ConnectionEvent::Referral {
                referred_by: parent.to_string(),
                user: child.to_string(),
                created_at: TS.to_string(),
            },
        )
    }

    fn add_friend(a: &str, b: &str, seq: i64) -> SequencedEvent {
        SequencedEvent::new(
            seq,
            ConnectionEvent::AddFriend {
                user1: a.to_string(),
                user2: b.to_string(),
                created_at: TS.to_string(),
            },
        )
    }

    fn unfriend(a: &str, b: &str, seq: i64) -> SequencedEvent {
        SequencedEvent::new(
            seq,
            ConnectionEvent::Unfriend {
                user1: a.to_string(),
                user2: b.to_string(),
                created_at: TS.to_string(),
            },
        )
    }

    fn points(engine: &GraphEngine, name: &str) -> i64 {
        engine.user(name).map(|u| u.referral_points).unwrap_or(-99)
    }

    fn assert_friends_symmetric(engine: &GraphEngine) {
        for node in engine.snapshot() {
            for friend in &node.friends {
                let peer = engine.user(friend).unwrap();
                assert!(
                    peer.friends.contains(&node.name),
                    "{} lists {} but not the reverse",
                    node.name,
                    friend
                );
            }
        }
    }

    /// A mixed sequence touching every event type.
    fn mixed_sequence() -> Vec<SequencedEvent> {
        vec![
            register("alice", 1),
            register("bob", 2),
            register("carol", 3),
            referral("alice", "bob", 4),
            referral("bob", "carol", 5),
            add_friend("alice", "carol", 6),
            add_friend("bob", "carol", 7),
            unfriend("alice", "carol", 8),
            register("dave", 9),
            referral("carol", "dave", 10),
        ]
    }

    // ========================================================================
    // Register
    // ========================================================================

    #[test]
    fn test_register_creates_node() {
        let mut engine = GraphEngine::new();

        let result = engine.ingest(&register("alice", 1));

        assert!(result.applied);
        assert_eq!(result.touched, vec!["alice".to_string()]);
        let alice = engine.user("alice").unwrap();
        assert_eq!(alice.created_at.as_deref(), Some(TS));
        assert_eq!(alice.last_seq, 1);
    }

    #[test]
    fn test_register_exact_duplicate_is_rejected() {
        let mut engine = GraphEngine::new();

        assert!(engine.ingest(&register("alice", 1)).applied);
        let again = engine.ingest(&register("alice", 1));

        assert!(!again.applied);
        assert!(again.touched.is_empty());
    }

    #[test]
    fn test_register_stale_is_rejected() {
        let mut engine = GraphEngine::new();

        assert!(engine.ingest(&register("alice", 2)).applied);
        assert!(!engine.ingest(&register("alice", 1)).applied);
        assert_eq!(engine.user("alice").unwrap().last_seq, 2);
    }

    #[test]
    fn test_register_keeps_first_created_at() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("alice", 1));

        let later = SequencedEvent::new(
            5,
            ConnectionEvent::Register {
                name: "alice".to_string(),
                created_at: "2025-06-01T00:00:00.000Z".to_string(),
            },
        );
        let result = engine.ingest(&later);

        // The seq still advances, so the event counts as applied.
        assert!(result.applied);
        let alice = engine.user("alice").unwrap();
        assert_eq!(alice.created_at.as_deref(), Some(TS));
        assert_eq!(alice.last_seq, 5);
    }

    // ========================================================================
    // Referral
    // ========================================================================

    #[test]
    fn test_referral_awards_parent() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("parent", 1));
        engine.ingest(&register("child", 2));

        let result = engine.ingest(&referral("parent", "child", 3));

        assert!(result.applied);
        assert_eq!(
            result.touched,
            vec!["parent".to_string(), "child".to_string()]
        );
        assert_eq!(points(&engine, "parent"), 1);
        assert_eq!(
            engine.user("child").unwrap().referred_by.as_deref(),
            Some("parent")
        );

        let again = engine.ingest(&referral("parent", "child", 3));
        assert!(!again.applied);
        assert!(again.touched.is_empty());
        assert_eq!(points(&engine, "parent"), 1);
    }

    #[test]
    fn test_referral_redelivered_with_newer_seq_does_not_double_award() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("parent", 1));
        engine.ingest(&register("child", 2));
        engine.ingest(&referral("parent", "child", 3));

        let result = engine.ingest(&referral("parent", "child", 10));

        assert!(!result.applied);
        assert_eq!(points(&engine, "parent"), 1);
    }

    #[test]
    fn test_referral_chain_depth_two() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("grandparent", 1));
        engine.ingest(&register("parent", 2));
        engine.ingest(&register("child", 3));

        assert!(engine.ingest(&referral("grandparent", "parent", 4)).applied);
        assert!(engine.ingest(&referral("parent", "child", 5)).applied);

        assert_eq!(points(&engine, "grandparent"), 2);
        assert_eq!(points(&engine, "parent"), 1);
        assert_eq!(points(&engine, "child"), 0);
    }

    #[test]
    fn test_referral_chain_depth_one() {
        let mut engine = GraphEngine::with_referral_point_depth(1);
        engine.ingest(&register("grandparent", 1));
        engine.ingest(&register("parent", 2));
        engine.ingest(&register("child", 3));

        engine.ingest(&referral("grandparent", "parent", 4));
        let before = points(&engine, "grandparent");
        engine.ingest(&referral("parent", "child", 5));

        assert_eq!(points(&engine, "grandparent"), before);
        assert_eq!(points(&engine, "parent"), 1);
        assert_eq!(points(&engine, "child"), 0);
    }

    #[test]
    fn test_referral_propagation_stops_at_depth() {
        let mut engine = GraphEngine::new();
        for (seq, name) in ["a", "b", "c", "d"].iter().enumerate() {
            engine.ingest(&register(name, seq as i64 + 1));
        }
        engine.ingest(&referral("a", "b", 10));
        engine.ingest(&referral("b", "c", 11));
        engine.ingest(&referral("c", "d", 12));

        // c (+1) and b (+1) are within depth 2, a is not.
        assert_eq!(points(&engine, "c"), 1);
        assert_eq!(points(&engine, "b"), 2);
        assert_eq!(points(&engine, "a"), 2);
    }

    #[test]
    fn test_referral_rejections() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("alice", 1));
        engine.ingest(&register("bob", 2));

        assert!(!engine.ingest(&referral("alice", "alice", 3)).applied);
        assert!(!engine.ingest(&referral("alice", "ghost", 4)).applied);
        assert!(!engine.ingest(&referral("ghost", "alice", 5)).applied);
        assert!(!engine.ingest(&referral("alice", "bob", 2)).applied);
        assert!(engine.user("ghost").is_none());
        assert_eq!(engine.user("alice").unwrap().last_seq, 1);
    }

    #[test]
    fn test_referred_by_first_writer_wins() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("alice", 1));
        engine.ingest(&register("mallory", 2));
        engine.ingest(&register("bob", 3));
        engine.ingest(&referral("alice", "bob", 4));

        let result = engine.ingest(&referral("mallory", "bob", 5));

        assert!(!result.applied);
        let bob = engine.user("bob").unwrap();
        assert_eq!(bob.referred_by.as_deref(), Some("alice"));
        assert_eq!(bob.last_seq, 4);
        assert!(engine.user("mallory").unwrap().referrals.is_empty());
        assert_eq!(points(&engine, "mallory"), 0);
    }

    // ========================================================================
    // Friendship
    // ========================================================================

    #[test]
    fn test_add_then_unfriend() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("a", 1));
        engine.ingest(&register("b", 2));

        assert!(engine.ingest(&add_friend("a", "b", 3)).applied);
        assert_friends_symmetric(&engine);
        assert!(engine.user("a").unwrap().friends.contains("b"));

        assert!(engine.ingest(&unfriend("a", "b", 4)).applied);
        let third = engine.ingest(&unfriend("a", "b", 5));

        assert!(!third.applied);
        assert!(engine.user("a").unwrap().friends.is_empty());
        assert!(engine.user("b").unwrap().friends.is_empty());
        assert_eq!(engine.user("a").unwrap().last_seq, 4);
    }

    #[test]
    fn test_add_friend_is_symmetric_regardless_of_order() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("a", 1));
        engine.ingest(&register("b", 2));

        engine.ingest(&add_friend("b", "a", 3));
        let duplicate = engine.ingest(&add_friend("a", "b", 4));

        assert!(!duplicate.applied);
        assert_friends_symmetric(&engine);
        assert_eq!(engine.user("b").unwrap().friends.len(), 1);
    }

    #[test]
    fn test_friendship_rejections() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("a", 1));
        engine.ingest(&register("b", 2));

        assert!(!engine.ingest(&add_friend("a", "a", 3)).applied);
        assert!(!engine.ingest(&add_friend("a", "ghost", 4)).applied);
        assert!(!engine.ingest(&unfriend("a", "ghost", 5)).applied);
        assert!(!engine.ingest(&add_friend("a", "b", 2)).applied);
        assert!(engine.user("ghost").is_none());
        assert!(engine.user("a").unwrap().friends.is_empty());
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let mut engine = GraphEngine::new();
        let result = engine.ingest(&SequencedEvent::new(1, ConnectionEvent::Unknown));

        assert_eq!(result, IngestResult::rejected());
        assert!(engine.is_empty());
        assert_eq!(engine.dirty_count(), 0);
    }

    // ========================================================================
    // Properties
    // ========================================================================

    #[test]
    fn test_replay_is_idempotent() {
        let events = mixed_sequence();

        let mut once = GraphEngine::new();
        once.ingest_many(&events);

        let mut twice = GraphEngine::new();
        twice.ingest_many(&events);
        let second_pass = twice.ingest_many(&events);

        assert_eq!(second_pass, 0);
        assert_eq!(once.snapshot(), twice.snapshot());
    }

    #[test]
    fn test_last_seq_never_decreases_with_interleaved_partitions() {
        let mut engine = GraphEngine::new();
        // Two partitions delivering with no cross-partition ordering.
        let partition_a = [register("a", 10), register("b", 12), add_friend("a", "b", 14)];
        let partition_b = [register("a", 3), register("b", 5), unfriend("a", "b", 11)];

        let mut seen: BTreeMap<String, i64> = BTreeMap::new();
        for event in partition_a.iter().zip(partition_b.iter()).flat_map(|(x, y)| [x, y]) {
            engine.ingest(event);
            for node in engine.snapshot() {
                let previous = seen.insert(node.name.clone(), node.last_seq).unwrap_or(-1);
                assert!(node.last_seq >= previous);
            }
            assert_friends_symmetric(&engine);
        }
        assert_eq!(engine.user("a").unwrap().last_seq, 14);
    }

    #[test]
    fn test_snapshot_hydrate_round_trip() {
        let mut engine = GraphEngine::new();
        engine.ingest_many(&mixed_sequence());
        let original = engine.snapshot();

        let mut restored = GraphEngine::new();
        restored.hydrate(original.clone());

        assert_eq!(restored.snapshot(), original);
        assert_eq!(restored.dirty_count(), 0);
    }

    #[test]
    fn test_snapshot_is_sorted_and_leaves_dirty_set() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("zed", 1));
        engine.ingest(&register("amy", 2));

        let names: Vec<String> = engine.snapshot().into_iter().map(|n| n.name).collect();

        assert_eq!(names, vec!["amy".to_string(), "zed".to_string()]);
        assert_eq!(engine.dirty_count(), 2);
    }

    #[test]
    fn test_ingest_many_counts_applied() {
        let mut engine = GraphEngine::new();
        let events = vec![register("a", 1), register("a", 1), register("b", 2)];

        assert_eq!(engine.ingest_many(&events), 2);
    }

    // ========================================================================
    // Dirty tracking
    // ========================================================================

    #[test]
    fn test_drain_dirty_nodes() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("a", 1));
        engine.ingest(&register("b", 2));
        engine.ingest(&add_friend("a", "b", 3));

        let drained = engine.drain_dirty_nodes();

        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|n| n.friends_count == 1));
        assert_eq!(engine.user("a").unwrap().friends_count, 1);
        assert!(engine.drain_dirty_nodes().is_empty());
    }

    #[test]
    fn test_drain_includes_credited_ancestors() {
        let mut engine = GraphEngine::new();
        engine.ingest_many(&[register("gp", 1), register("p", 2), register("c", 3)]);
        engine.ingest(&referral("gp", "p", 4));
        engine.drain_dirty_nodes();

        engine.ingest(&referral("p", "c", 5));
        let names: Vec<String> = engine
            .drain_dirty_nodes()
            .into_iter()
            .map(|n| n.name)
            .collect();

        assert_eq!(
            names,
            vec!["c".to_string(), "gp".to_string(), "p".to_string()]
        );
    }

    #[test]
    fn test_rejected_event_leaves_no_dirty_state() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("a", 5));
        engine.drain_dirty_nodes();

        engine.ingest(&register("a", 3));
        engine.ingest(&add_friend("a", "ghost", 6));

        assert!(engine.drain_dirty_nodes().is_empty());
    }

    #[test]
    fn test_hydrate_clears_dirty_and_mark_dirty_requeues() {
        let mut engine = GraphEngine::new();
        engine.ingest(&register("stale", 1));

        let mut alice = PersistableUserNode::empty("alice");
        alice.last_seq = 7;
        engine.hydrate(vec![alice]);

        assert!(engine.user("stale").is_none());
        assert!(engine.drain_dirty_nodes().is_empty());

        engine.mark_dirty(["alice", "nobody"]);
        let drained = engine.drain_dirty_nodes();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].last_seq, 7);
    }
}
