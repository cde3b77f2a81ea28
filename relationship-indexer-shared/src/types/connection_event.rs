//! Relationship events as they appear on the log.
//!
//! Payloads are JSON objects tagged by a `type` field. The sequence number is
//! never part of the payload: it is assigned from the log position by the
//! consumer and carried alongside the event in [`SequencedEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A relationship event read from the log.
///
/// Unrecognized `type` values deserialize into [`ConnectionEvent::Unknown`]
/// so that newer producers never break older consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionEvent {
    /// A user joined the network.
    Register { name: String, created_at: String },
    /// `referred_by` brought `user` into the network.
    Referral {
        #[serde(rename = "referredBy")]
        referred_by: String,
        user: String,
        created_at: String,
    },
    /// Two users became friends.
    #[serde(rename = "addfriend")]
    AddFriend {
        #[serde(rename = "user1_name")]
        user1: String,
        #[serde(rename = "user2_name")]
        user2: String,
        created_at: String,
    },
    /// Two users stopped being friends.
    Unfriend {
        #[serde(rename = "user1_name")]
        user1: String,
        #[serde(rename = "user2_name")]
        user2: String,
        created_at: String,
    },
    /// Any event type this build does not understand.
    #[serde(other)]
    Unknown,
}

/// The known event types, used for per-type accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventType {
    Register,
    Referral,
    AddFriend,
    Unfriend,
}

impl ConnectionEventType {
    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionEventType::Register => "register",
            ConnectionEventType::Referral => "referral",
            ConnectionEventType::AddFriend => "addfriend",
            ConnectionEventType::Unfriend => "unfriend",
        }
    }
}

impl ConnectionEvent {
    /// The event type, or `None` for [`ConnectionEvent::Unknown`].
    pub fn event_type(&self) -> Option<ConnectionEventType> {
        match self {
            ConnectionEvent::Register { .. } => Some(ConnectionEventType::Register),
            ConnectionEvent::Referral { .. } => Some(ConnectionEventType::Referral),
            ConnectionEvent::AddFriend { .. } => Some(ConnectionEventType::AddFriend),
            ConnectionEvent::Unfriend { .. } => Some(ConnectionEventType::Unfriend),
            ConnectionEvent::Unknown => None,
        }
    }

    /// Wire name of the event type (`"unknown"` for unrecognized events).
    pub fn type_name(&self) -> &'static str {
        self.event_type()
            .map(|t| t.as_str())
            .unwrap_or("unknown")
    }

    /// The raw `created_at` value carried by the payload.
    pub fn created_at(&self) -> Option<&str> {
        match self {
            ConnectionEvent::Register { created_at, .. }
            | ConnectionEvent::Referral { created_at, .. }
            | ConnectionEvent::AddFriend { created_at, .. }
            | ConnectionEvent::Unfriend { created_at, .. } => Some(created_at),
            ConnectionEvent::Unknown => None,
        }
    }

    /// The payload timestamp parsed as RFC 3339, if present and valid.
    pub fn event_timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// An event paired with the sequence number derived from its log position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedEvent {
    pub seq: i64,
    pub event: ConnectionEvent,
}

impl SequencedEvent {
    pub fn new(seq: i64, event: ConnectionEvent) -> Self {
        Self { seq, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_wire_payloads() {
        let register: ConnectionEvent = serde_json::from_str(
            r#"{"type":"register","name":"alice","created_at":"2024-01-01T00:00:00.000Z"}"#,
        )
        .unwrap();
        assert_eq!(
            register,
            ConnectionEvent::Register {
                name: "alice".to_string(),
                created_at: "2024-01-01T00:00:00.000Z".to_string(),
            }
        );

        let referral: ConnectionEvent = serde_json::from_str(
            r#"{"type":"referral","referredBy":"alice","user":"bob","created_at":"2024-01-01T00:00:01.000Z"}"#,
        )
        .unwrap();
        assert!(matches!(
            referral,
            ConnectionEvent::Referral { ref referred_by, ref user, .. }
                if referred_by == "alice" && user == "bob"
        ));

        let friend: ConnectionEvent = serde_json::from_str(
            r#"{"type":"addfriend","user1_name":"alice","user2_name":"bob","created_at":"2024-01-01T00:00:02.000Z"}"#,
        )
        .unwrap();
        assert_eq!(friend.event_type(), Some(ConnectionEventType::AddFriend));
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let event: ConnectionEvent =
            serde_json::from_str(r#"{"type":"block","user":"mallory"}"#).unwrap();
        assert_eq!(event, ConnectionEvent::Unknown);
        assert_eq!(event.type_name(), "unknown");
        assert!(event.created_at().is_none());
    }

    #[test]
    fn test_event_timestamp() {
        let event = ConnectionEvent::Register {
            name: "alice".to_string(),
            created_at: "2024-01-01T00:00:05.250Z".to_string(),
        };
        let ts = event.event_timestamp().unwrap();
        assert_eq!(ts.timestamp_millis(), 1_704_067_205_250);

        let invalid = ConnectionEvent::Register {
            name: "alice".to_string(),
            created_at: "not-a-date".to_string(),
        };
        assert!(invalid.event_timestamp().is_none());
    }
}
