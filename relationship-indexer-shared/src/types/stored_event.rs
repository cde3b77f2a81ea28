//! Raw events as appended to the durable event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw event exactly as it was read from the log, plus its log coordinates.
///
/// `payload` keeps the original JSON verbatim, including event types the
/// current build does not understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub seq: i64,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_timestamp: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl StoredEvent {
    /// Key identifying the event's position in the log.
    pub fn log_position(&self) -> (i32, i64) {
        (self.partition, self.offset)
    }
}
