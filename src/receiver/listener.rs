use std::sync::Arc;

use crate::bus::Message;
use crate::error::ListenerError;
use crate::event::EventRecord;

/// Consumes events from its own queue.
pub trait EventListener: Send + Sync {
    /// Stable identity; the listener's queue is named after it.
    fn name(&self) -> &str;

    /// Handle one event. Connectivity-class errors leave the message for
    /// redelivery, any other error discards it.
    fn on_event(&self, event: &EventRecord) -> Result<(), ListenerError>;

    /// Whether this listener forwards to the secondary broker, which makes
    /// its receiver follow the secondary broker's health.
    fn requires_secondary_bus(&self) -> bool {
        false
    }
}

/// Handles raw messages taken off a queue.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &Message) -> Result<(), ListenerError>;
}

/// Decodes event messages and hands them to an [`EventListener`].
pub struct EventDispatch {
    listener: Arc<dyn EventListener>,
}

impl EventDispatch {
    pub fn new(listener: Arc<dyn EventListener>) -> Self {
        Self { listener }
    }
}

impl MessageHandler for EventDispatch {
    fn handle(&self, message: &Message) -> Result<(), ListenerError> {
        let event = EventRecord::from_message(message)?;
        self.listener.on_event(&event)
    }
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> Result<(), ListenerError> + Send + Sync,
{
    fn handle(&self, message: &Message) -> Result<(), ListenerError> {
        self(message)
    }
}
