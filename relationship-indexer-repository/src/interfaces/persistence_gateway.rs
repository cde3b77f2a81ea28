use async_trait::async_trait;
use relationship_indexer_shared::{PersistableUserNode, StoredEvent};

use crate::errors::RepositoryError;

/// Durable store for user records, partition checkpoints and the raw event log.
///
/// The gateway only ever sees immutable projections of graph state. Every
/// write is idempotent: user upserts are keyed by name, checkpoints by
/// `(topic, partition)` and raw events by their log position, so replaying a
/// batch after a crash never duplicates anything.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Last durably applied offset for a partition, if one was ever saved.
    async fn get_checkpoint(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, RepositoryError>;

    async fn save_checkpoint(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), RepositoryError>;

    async fn load_all_users(&self) -> Result<Vec<PersistableUserNode>, RepositoryError>;

    /// Bulk per-name upsert. Order of `users` carries no meaning.
    async fn upsert_users(&self, users: &[PersistableUserNode]) -> Result<(), RepositoryError>;

    /// Appends raw events, silently skipping any whose log position is
    /// already stored. Returns the number of newly stored events.
    async fn append_raw_events(&self, events: &[StoredEvent]) -> Result<u64, RepositoryError>;

    async fn count_raw_events(&self) -> Result<u64, RepositoryError>;

    /// A page of the raw event log in append order.
    async fn load_raw_events_page(
        &self,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<StoredEvent>, RepositoryError>;

    /// Releases the underlying connections.
    async fn close(&self);
}
