//! Loader module for the relationship indexer.
//!
//! Persists raw events, dirty users and partition checkpoints through the
//! persistence gateway. Failures are logged with their context and returned;
//! nothing is retried here. The processor decides what a failure means for
//! the batch at hand.

use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::errors::IngestError;
use relationship_indexer_repository::PersistenceGateway;
use relationship_indexer_shared::{PersistableUserNode, StoredEvent};

/// Loader that writes graph state and log positions to the gateway.
pub struct GraphLoader {
    gateway: Arc<dyn PersistenceGateway>,
}

impl GraphLoader {
    /// Create a new loader on top of the given gateway.
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }

    /// Load every persisted user for hydration at startup.
    pub async fn load_users(&self) -> Result<Vec<PersistableUserNode>, IngestError> {
        self.gateway.load_all_users().await.map_err(|e| {
            error!(error = %e, "Failed to load persisted users");
            IngestError::loader(format!("Failed to load users: {}", e))
        })
    }

    pub async fn checkpoint(&self, topic: &str, partition: i32) -> Result<Option<i64>, IngestError> {
        self.gateway
            .get_checkpoint(topic, partition)
            .await
            .map_err(|e| {
                error!(topic = %topic, partition = partition, error = %e, "Failed to read checkpoint");
                IngestError::loader(format!("Failed to read checkpoint: {}", e))
            })
    }

    /// Append raw events. Already stored positions are skipped by the gateway.
    #[instrument(skip(self, events), fields(event_count = events.len()))]
    pub async fn store_events(&self, events: &[StoredEvent]) -> Result<u64, IngestError> {
        if events.is_empty() {
            return Ok(0);
        }

        match self.gateway.append_raw_events(events).await {
            Ok(inserted) => {
                debug!(
                    inserted = inserted,
                    duplicates = events.len() as u64 - inserted.min(events.len() as u64),
                    "Stored raw events"
                );
                Ok(inserted)
            }
            Err(e) => {
                let first = events.first().map(|e| e.offset).unwrap_or(-1);
                let last = events.last().map(|e| e.offset).unwrap_or(-1);
                error!(
                    first_offset = first,
                    last_offset = last,
                    event_count = events.len(),
                    error = %e,
                    "Failed to store raw events"
                );
                Err(IngestError::loader(format!("Failed to store raw events: {}", e)))
            }
        }
    }

    /// Upsert drained users.
    #[instrument(skip(self, users), fields(user_count = users.len()))]
    pub async fn flush_users(&self, users: &[PersistableUserNode]) -> Result<(), IngestError> {
        if users.is_empty() {
            return Ok(());
        }

        self.gateway.upsert_users(users).await.map_err(|e| {
            error!(user_count = users.len(), error = %e, "Failed to flush dirty users");
            IngestError::loader(format!("Failed to flush users: {}", e))
        })
    }

    pub async fn save_checkpoint(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), IngestError> {
        self.gateway
            .save_checkpoint(topic, partition, offset)
            .await
            .map_err(|e| {
                error!(
                    topic = %topic,
                    partition = partition,
                    offset = offset,
                    error = %e,
                    "Failed to save checkpoint"
                );
                IngestError::loader(format!("Failed to save checkpoint: {}", e))
            })
    }

    pub async fn close(&self) {
        self.gateway.close().await;
    }
}
