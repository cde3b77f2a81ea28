use relationship_indexer_repository::RepositoryError;
use thiserror::Error;

/// Errors raised by the backfill, replay and lookup jobs.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A requested capture does not exist.
    #[error("Snapshot not found: {0}")]
    NotFound(String),
}

impl SnapshotError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
