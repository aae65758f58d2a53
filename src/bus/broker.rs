//! Broker client surface.
//!
//! A backend provides a [`SessionFactory`] per connection. Sessions are
//! transacted: sends are buffered until `commit`, and acknowledgements are
//! settled on `commit` or `rollback`. Deliveries that are neither acknowledged
//! nor settled when their consumer or session closes go back to the head of
//! their queue, flagged as redelivered.

use std::sync::Arc;
use std::time::Duration;

use crate::error::BrokerError;

use super::message::{Delivery, Message, QueueStatus};
use super::selector::Selector;

/// Creates sessions on one broker connection.
pub trait SessionFactory: Send + Sync {
    fn create_session(&self) -> Result<Arc<dyn Session>, BrokerError>;

    /// True when this factory can no longer create sessions and must be rebuilt.
    fn is_closed(&self) -> bool;

    /// Close the factory. Calling it again is a no-op.
    fn close(&self);
}

/// A transacted session.
pub trait Session: Send + Sync {
    /// Buffer a message for the next commit.
    ///
    /// Fails fast with [`BrokerError::FlowStopped`] if any queue the message
    /// routes to is flow stopped.
    fn send(&self, message: Message) -> Result<(), BrokerError>;

    /// Route buffered messages in send order and settle acknowledged deliveries.
    fn commit(&self) -> Result<(), BrokerError>;

    /// Drop buffered messages. Acknowledged deliveries are settled, the rest
    /// are returned to their queue.
    fn rollback(&self) -> Result<(), BrokerError>;

    /// Declare a durable queue, optionally binding it to the session's exchange.
    fn declare_queue(&self, queue: &str, binding_key: Option<&str>) -> Result<(), BrokerError>;

    fn create_consumer(
        &self,
        queue: &str,
        selector: Option<&Selector>,
    ) -> Result<Arc<dyn Consumer>, BrokerError>;

    fn queue_status(&self, queue: &str) -> Result<QueueStatus, BrokerError>;

    /// Close the session, rolling back anything uncommitted. Never fails.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Pulls deliveries from one queue.
pub trait Consumer: Send + Sync {
    /// Wait up to `timeout` for the next matching delivery.
    fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Mark a delivery as handled; it is settled on the session's next
    /// commit or rollback.
    fn acknowledge(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Close the consumer, returning its unacknowledged deliveries. Never fails.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
