use std::sync::Arc;

use tracing::debug;

use crate::connection::EgressConnection;
use crate::error::BrokerError;
use crate::event::{EventFilter, EventRecord};

/// Synchronous, single-event publishing outside any unit of work.
///
/// Unlike the outbox, failures reach the caller, including
/// [`BrokerError::FlowStopped`] so callers can refuse instead of waiting.
pub struct DirectPublisher {
    connection: Arc<EgressConnection>,
    filter: EventFilter,
}

impl DirectPublisher {
    pub fn new(connection: Arc<EgressConnection>, filter: EventFilter) -> Self {
        Self { connection, filter }
    }

    /// Publish and commit one event. Returns `Ok(false)` if it was filtered.
    pub fn send(&self, event: &EventRecord) -> Result<bool, BrokerError> {
        if self.filter.should_filter(event) {
            debug!(
                event_type = %event.event_type,
                target = %event.target,
                "event filtered"
            );
            return Ok(false);
        }

        let message = event.to_message()?;
        let session = self.connection.create_session()?;
        let result = session.send(message).and_then(|()| session.commit());
        session.close();
        result.map(|()| true)
    }
}
