//! Broker abstraction consumed by the processor.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::IngestError;

/// One message as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

impl RawMessage {
    pub fn new(offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            offset,
            payload: Some(payload.into()),
        }
    }

    /// A message without a payload (tombstone or empty value).
    pub fn empty(offset: i64) -> Self {
        Self {
            offset,
            payload: None,
        }
    }

    /// The payload, treating a zero-length value like a missing one.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref().filter(|bytes| !bytes.is_empty())
    }
}

/// Ordered slice of a single partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBatch {
    pub topic: String,
    pub partition: i32,
    pub messages: Vec<RawMessage>,
}

/// What the broker hands to the consume loop next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The group assigned these partitions to this member.
    Assigned(Vec<i32>),
    Batch(MessageBatch),
    /// Unrecoverable consumer failure. The process is expected to exit.
    Fatal(String),
    /// The stream is finished and no further events will arrive.
    End,
}

/// Client side of the partitioned log.
///
/// The processor drives it from a single task. Implementations only need
/// interior mutability for their own buffering.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn topic(&self) -> &str;

    /// Earliest retained offset of every partition of the topic.
    async fn fetch_earliest_offsets(&self) -> Result<HashMap<i32, i64>, IngestError>;

    async fn subscribe(&self) -> Result<(), IngestError>;

    /// Wait for the next assignment, batch or terminal condition.
    async fn next_event(&self) -> BrokerEvent;

    async fn seek(&self, partition: i32, offset: i64) -> Result<(), IngestError>;

    /// Seek to the oldest message the broker still retains.
    async fn seek_to_beginning(&self, partition: i32) -> Result<(), IngestError>;

    /// Mark everything up to and including `offset` as consumed.
    async fn acknowledge(&self, partition: i32, offset: i64) -> Result<(), IngestError>;

    /// Signal liveness to the group coordinator during long persistence work.
    async fn heartbeat(&self) -> Result<(), IngestError>;

    async fn stop(&self) -> Result<(), IngestError>;
}
