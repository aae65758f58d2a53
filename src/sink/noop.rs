use tracing::debug;

use crate::event::EventRecord;

use super::{EventSink, UnitOfWork};

/// Sink for deployments with messaging disabled. Accepts and logs events,
/// never touches a broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn queue_event(&self, _uow: &mut UnitOfWork, event: EventRecord) {
        debug!(
            event_type = %event.event_type,
            target = %event.target,
            "messaging disabled, event not published"
        );
    }

    fn send_events(&self, _uow: &mut UnitOfWork) {}

    fn rollback(&self, _uow: &mut UnitOfWork) {}
}
