//! Error types for the event layer.
//!
//! Errors are split by how they are handled: configuration problems stop
//! startup, broker problems are retried or swallowed by the outbox, and
//! listener problems decide whether a message is redelivered or discarded.

use std::error::Error;

use thiserror::Error;

/// Invalid or unusable configuration. Always fatal at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The default filter policy is not one of the known policy names.
    #[error("invalid event filter policy: {0}")]
    InvalidFilterPolicy(String),

    /// A filter rule is not a valid `TYPE-TARGET` pair.
    #[error("invalid event filter rule: {0}")]
    InvalidFilterRule(String),

    /// A configured listener id has no registered constructor.
    #[error("unknown event listener: {0}")]
    UnknownListener(String),

    /// The broker URL uses a scheme no backend handles.
    #[error("unsupported broker url: {0}")]
    UnsupportedBroker(String),

    /// The broker URL names a broker that is not known to the directory.
    #[error("no broker registered for url: {0}")]
    UnknownBroker(String),

    /// A setting could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Errors raised while talking to a broker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker cannot be reached (outage, timeout, refused connection).
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The session, consumer or factory has been closed.
    #[error("broker resource closed: {0}")]
    Closed(String),

    /// A destination queue is flow-stopped and refuses new messages.
    #[error("queue {queue} is flow stopped")]
    FlowStopped { queue: String },

    /// The message could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The broker rejected the operation.
    #[error("rejected by broker: {0}")]
    Rejected(String),
}

impl BrokerError {
    /// Whether this is a transient connectivity problem that a reconnect can fix.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_) | BrokerError::Closed(_))
    }

    /// Whether the broker is applying backpressure.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, BrokerError::FlowStopped { .. })
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

/// Errors raised by listeners and job dispatchers while handling a message.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// A broker operation failed inside the handler.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The message payload could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The handler rejected the message.
    #[error("listener failed: {0}")]
    Failed(String),

    /// Any other error.
    #[error("listener error: {0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl ListenerError {
    /// Connectivity-class failures leave the message for redelivery; every
    /// other failure discards it.
    ///
    /// Backpressure counts as connectivity here so that a flow-stopped
    /// downstream delays delivery instead of dropping messages.
    pub fn is_connectivity(&self) -> bool {
        match self {
            ListenerError::Broker(e) => e.is_connectivity() || e.is_backpressure(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ListenerError {
    fn from(err: serde_json::Error) -> Self {
        ListenerError::Decode(err.to_string())
    }
}

/// Failure while starting the event bus.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The primary broker refused the receivers.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
