//! Wire message and delivery types shared by every broker backend.

use std::collections::BTreeMap;

use serde::Serialize;

/// Well-known message property names.
pub mod properties {
    /// Event type of an event message (`CREATED`, ...).
    pub const EVENT_TYPE: &str = "EVENT_TYPE";
    /// Event target of an event message (`CONSUMER`, ...).
    pub const EVENT_TARGET: &str = "EVENT_TARGET";
    /// Job key used by job selectors.
    pub const JOB_KEY: &str = "JOB_KEY";
    /// Destination a diverted message was first addressed to.
    pub const ORIGINAL_DESTINATION: &str = "ORIGINAL_DESTINATION";
}

/// A message to be sent through a broker session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Broker-assigned id, set once the message has been routed.
    pub id: Option<String>,
    /// Routing key, e.g. `consumer.created`.
    pub destination: String,
    /// UTF-8 JSON payload.
    pub payload: Vec<u8>,
    /// String properties, visible to selectors.
    pub properties: BTreeMap<String, String>,
    /// Persistent delivery mode.
    pub durable: bool,
    /// Set by the session when the payload exceeds the large message threshold.
    pub large: bool,
}

impl Message {
    /// Create a durable message for the given destination.
    pub fn new(destination: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: None,
            destination: destination.into(),
            payload,
            properties: BTreeMap::new(),
            durable: true,
            large: false,
        }
    }

    /// Create a message whose payload is the JSON encoding of `value`.
    pub fn json<T: Serialize>(
        destination: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(destination, serde_json::to_vec(value)?))
    }

    /// Add a string property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Whether this message reached its queue through a diversion.
    pub fn is_diverted(&self) -> bool {
        self.properties
            .contains_key(properties::ORIGINAL_DESTINATION)
    }
}

/// A message handed to a consumer, pending acknowledgement.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Broker-local delivery tag, unique per broker.
    pub tag: u64,
    /// Queue the message was taken from.
    pub queue: String,
    pub message: Message,
    /// True when the message was delivered before and not settled.
    pub redelivered: bool,
}

/// Reporting snapshot of a single queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_name: String,
    pub pending_message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
}

impl QueueStatus {
    pub fn new(queue_name: impl Into<String>, pending_message_count: usize) -> Self {
        Self {
            queue_name: queue_name.into(),
            pending_message_count,
            last_message_id: None,
        }
    }
}
