// Message models shared by the registration and release paths

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message flowing through the publishing pipeline.
///
/// The body is producer-owned and never interpreted here. `key` is only used
/// to derive a storage partition, and `deliver_at` marks the message as a
/// timer message to be held back until that instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Broker routing subject, e.g. "orders.created".
    pub subject: String,
    /// Optional partitioning key. Keyless messages are spread round-robin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Opaque producer payload.
    pub body: serde_json::Value,
    /// Earliest instant the message may be handed to the sink. `None` means
    /// the message is immediate and bypasses the timer store entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create an immediate message.
    pub fn new(subject: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            subject: subject.into(),
            key: None,
            body,
            deliver_at: None,
        }
    }

    /// Create a message to be delivered no earlier than `deliver_at`.
    pub fn delayed(
        subject: impl Into<String>,
        body: serde_json::Value,
        deliver_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject: subject.into(),
            key: None,
            body,
            deliver_at: Some(deliver_at),
        }
    }

    /// Attach a partitioning key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// One scheduled unit held by a message store.
///
/// Entries are immutable after registration: release reads and deletes, it
/// never updates. The partition is the store's bucketing key, not a field of
/// the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    /// Unique within the entry's partition, generated at registration.
    pub id: Uuid,
    /// Copied out of the message at registration; never changes.
    pub deliver_at: DateTime<Utc>,
    /// The owned payload handed back to the sink at release.
    pub message: Message,
}

impl ScheduledMessage {
    /// Wrap a message into a fresh entry with a generated id.
    pub fn new(message: Message, deliver_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            deliver_at,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_message_has_no_delivery_time() {
        let message = Message::new("orders.created", serde_json::json!({"order": 42}));
        assert!(message.deliver_at.is_none());
        assert!(message.key.is_none());
    }

    #[test]
    fn test_delayed_message_carries_delivery_time() {
        let at = Utc::now();
        let message = Message::delayed("orders.reminder", serde_json::json!({}), at)
            .with_key("customer-7");
        assert_eq!(message.deliver_at, Some(at));
        assert_eq!(message.key.as_deref(), Some("customer-7"));
    }

    #[test]
    fn test_entries_with_identical_payload_get_distinct_ids() {
        let at = Utc::now();
        let message = Message::delayed("orders.reminder", serde_json::json!({}), at);
        let a = ScheduledMessage::new(message.clone(), at);
        let b = ScheduledMessage::new(message, at);
        assert_ne!(a.id, b.id);
    }
}
