//! In-memory persistence gateway for tests and local development.
//!
//! `InMemoryGateway` honors the same idempotence rules as the PostgreSQL
//! gateway and can be told to fail individual operations, which lets callers
//! exercise their persistence failure paths without a database.
//!
//! # Example
//!
//! ```ignore
//! use relationship_indexer_repository::{InMemoryGateway, PersistenceGateway};
//!
//! let gateway = InMemoryGateway::with_users(vec![PersistableUserNode::empty("alice")]);
//! gateway.fail_upserts(true);
//! assert!(gateway.upsert_users(&[]).await.is_err());
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use relationship_indexer_shared::{PersistableUserNode, StoredEvent};

use crate::errors::RepositoryError;
use crate::interfaces::PersistenceGateway;

#[derive(Default)]
struct State {
    users: BTreeMap<String, PersistableUserNode>,
    checkpoints: HashMap<(String, i32), i64>,
    events: Vec<StoredEvent>,
    event_keys: HashSet<(String, i32, i64)>,
}

/// Persistence gateway that keeps everything in process memory.
#[derive(Default)]
pub struct InMemoryGateway {
    state: Mutex<State>,
    fail_upserts: AtomicBool,
    fail_checkpoints: AtomicBool,
    fail_appends: AtomicBool,
    upsert_calls: AtomicUsize,
    closed: AtomicBool,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a gateway pre-populated with user records.
    pub fn with_users(users: Vec<PersistableUserNode>) -> Self {
        let gateway = Self::new();
        {
            let mut state = gateway.lock();
            for user in users {
                state.users.insert(user.name.clone(), user);
            }
        }
        gateway
    }

    /// Create a gateway pre-populated with raw events.
    pub fn with_events(events: Vec<StoredEvent>) -> Self {
        let gateway = Self::new();
        {
            let mut state = gateway.lock();
            for event in events {
                let key = (event.topic.clone(), event.partition, event.offset);
                if state.event_keys.insert(key) {
                    state.events.push(event);
                }
            }
        }
        gateway
    }

    /// Make every subsequent `upsert_users` call fail until reset.
    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_checkpoints(&self, fail: bool) {
        self.fail_checkpoints.store(fail, Ordering::SeqCst);
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn user(&self, name: &str) -> Option<PersistableUserNode> {
        self.lock().users.get(name).cloned()
    }

    /// All stored users, sorted by name.
    pub fn users(&self) -> Vec<PersistableUserNode> {
        self.lock().users.values().cloned().collect()
    }

    pub fn checkpoint(&self, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .checkpoints
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// Stored raw events in append order.
    pub fn events(&self) -> Vec<StoredEvent> {
        self.lock().events.clone()
    }

    /// Number of `upsert_users` calls that reached the store.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn get_checkpoint(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, RepositoryError> {
        Ok(self.checkpoint(topic, partition))
    }

    async fn save_checkpoint(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), RepositoryError> {
        if self.fail_checkpoints.load(Ordering::SeqCst) {
            return Err(RepositoryError::unavailable("checkpoint write rejected"));
        }
        self.lock()
            .checkpoints
            .insert((topic.to_string(), partition), offset);
        Ok(())
    }

    async fn load_all_users(&self) -> Result<Vec<PersistableUserNode>, RepositoryError> {
        Ok(self.users())
    }

    async fn upsert_users(&self, users: &[PersistableUserNode]) -> Result<(), RepositoryError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::unavailable("user upsert rejected"));
        }
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        for user in users {
            state.users.insert(user.name.clone(), user.clone());
        }
        Ok(())
    }

    async fn append_raw_events(&self, events: &[StoredEvent]) -> Result<u64, RepositoryError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(RepositoryError::unavailable("event append rejected"));
        }
        let mut state = self.lock();
        let mut inserted = 0;
        for event in events {
            let key = (event.topic.clone(), event.partition, event.offset);
            if state.event_keys.insert(key) {
                state.events.push(event.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count_raw_events(&self) -> Result<u64, RepositoryError> {
        Ok(self.lock().events.len() as u64)
    }

    async fn load_raw_events_page(
        &self,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        Ok(self
            .lock()
            .events
            .iter()
            .skip(skip as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
