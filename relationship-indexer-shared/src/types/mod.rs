//! This module defines the core data structures used across the relationship indexer.

pub mod connection_event;
pub mod snapshot;
pub mod stored_event;
pub mod user_node;

pub use connection_event::{ConnectionEvent, ConnectionEventType, SequencedEvent};
pub use snapshot::{BackfillProgress, GraphSnapshot};
pub use stored_event::StoredEvent;
pub use user_node::{IngestResult, PersistableUserNode};
