//! # Relationship Indexer
//!
//! Consumes relationship events (registrations, referrals, friendships) from
//! Kafka, keeps a materialized social graph in memory, persists it
//! incrementally and captures point-in-time snapshots for delta analytics.
//!
//! ## Architecture
//!
//! 1. **Consumer**: Delivers ordered per-partition batches from Kafka
//! 2. **Graph**: Applies events idempotently and propagates referral points
//! 3. **Loader**: Persists raw events, dirty users and checkpoints
//! 4. **Processor**: Drives the batch loop and resume semantics
//! 5. **Snapshot**: Backfills the raw event log and replays it into captures
//!
//! ## Modules
//!
//! - [`config`]: Configuration and dependency initialization
//! - [`consumer`]: Broker abstraction and the Kafka client
//! - [`graph`]: The in-memory relationship graph
//! - [`loader`]: Persistence policy on top of the gateway
//! - [`processor`]: The stream processor and its metrics
//! - [`snapshot`]: Backfill, replay, lookup and leaderboards
//! - [`errors`]: Error types for the indexer
//! - [`telemetry`]: Tracing setup for the binaries

pub mod config;
pub mod consumer;
pub mod errors;
pub mod graph;
pub mod loader;
pub mod processor;
pub mod snapshot;
pub mod telemetry;

pub use config::Dependencies;
pub use errors::{IngestError, SnapshotError};

use thiserror::Error;

/// Errors that can occur during indexer initialization or execution.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Ingest error.
    #[error("Ingest error: {0}")]
    IngestError(#[from] IngestError),

    /// Snapshot job error.
    #[error("Snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),
}

impl IndexingError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
