//! Error types for the relationship indexer.

mod snapshot;

pub use snapshot::SnapshotError;

use relationship_indexer_repository::RepositoryError;
use thiserror::Error;

/// Errors that can occur while consuming and applying the event stream.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Error from the loader component.
    #[error("Loader error: {0}")]
    LoaderError(String),

    /// Kafka-related error.
    #[error("Kafka error: {0}")]
    KafkaError(String),

    /// The broker reported an unrecoverable consumer failure.
    #[error("Fatal consumer error: {0}")]
    FatalConsumerError(String),
}

impl IngestError {
    /// Create a loader error.
    pub fn loader(msg: impl Into<String>) -> Self {
        Self::LoaderError(msg.into())
    }

    /// Create a Kafka error.
    pub fn kafka(msg: impl Into<String>) -> Self {
        Self::KafkaError(msg.into())
    }

    /// Create a fatal consumer error.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::FatalConsumerError(msg.into())
    }
}

impl From<rdkafka::error::KafkaError> for IngestError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::KafkaError(err.to_string())
    }
}

impl From<RepositoryError> for IngestError {
    fn from(err: RepositoryError) -> Self {
        Self::LoaderError(err.to_string())
    }
}
