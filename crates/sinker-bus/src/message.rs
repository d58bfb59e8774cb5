//! Topics and the message envelope.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{BusError, Result};

/// Logical topics carried by the bus.
///
/// Each topic has exactly one conventional consumer group; the pairing is
/// fixed so that a message published once is processed once per concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// One message per newly created event; consumed to trigger dispatch.
    WebhookEvents,

    /// One message per lifecycle transition; consumed for observability
    /// fan-out only, never triggers dispatch.
    WebhookNotifications,

    /// One message per retry request; consumed to trigger a backoff-delayed
    /// dispatch.
    WebhookRetries,
}

impl Topic {
    /// Wire name of this topic.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebhookEvents => "webhook-events",
            Self::WebhookNotifications => "webhook-notifications",
            Self::WebhookRetries => "webhook-retries",
        }
    }

    /// Name of the conventional consumer group for this topic.
    pub fn default_group(self) -> &'static str {
        match self {
            Self::WebhookEvents => "webhook-events-group",
            Self::WebhookNotifications => "webhook-notifications-group",
            Self::WebhookRetries => "webhook-retries-group",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message as seen by consumers.
///
/// The payload is opaque bytes; handlers own decoding. Offsets are assigned
/// per topic at publish time and shared by every group's copy, so two groups
/// reading the same topic see identical offsets.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Topic this message was published on.
    pub topic: Topic,

    /// Partitioning/correlation key, typically the event id.
    pub key: String,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Position in the topic's publish order, starting at zero.
    pub offset: u64,

    /// When the bus accepted the message.
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    /// Decodes the payload as JSON.
    ///
    /// A decode failure is a handler error, so redelivery applies.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            BusError::decode(format!(
                "payload on {} at offset {} is not valid {}: {e}",
                self.topic,
                self.offset,
                std::any::type_name::<T>()
            ))
        })
    }
}
