//! # Relationship Indexer Shared
//!
//! This crate defines the data structures shared across the relationship
//! indexer ecosystem: the events read from the log, the persisted projection
//! of a user node, raw stored events and snapshot records.

pub mod types;

pub use types::connection_event::{ConnectionEvent, ConnectionEventType, SequencedEvent};
pub use types::snapshot::{BackfillProgress, GraphSnapshot};
pub use types::stored_event::StoredEvent;
pub use types::user_node::{IngestResult, PersistableUserNode};
