use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::bus::Session;
use crate::connection::EgressConnection;
use crate::event::{EventFilter, EventRecord};

use super::{EventSink, UnitOfWork};

/// Outbox publishing through a transacted session on the egress connection.
///
/// Queued messages become visible on the broker only when `send_events`
/// commits the session, in the order they were queued.
pub struct TransactionalEventSink {
    connection: Arc<EgressConnection>,
    filter: EventFilter,
}

impl TransactionalEventSink {
    pub fn new(connection: Arc<EgressConnection>, filter: EventFilter) -> Self {
        Self { connection, filter }
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// The unit of work's session, opening one on first use.
    fn session(&self, uow: &mut UnitOfWork) -> Option<Arc<dyn Session>> {
        if let Some(session) = &uow.session {
            if !session.is_closed() {
                return Some(Arc::clone(session));
            }
            warn!(
                lost = uow.queued,
                "outbox session closed underneath the unit of work, events queued so far are lost"
            );
            uow.take();
        }

        match self.connection.create_session() {
            Ok(session) => {
                uow.session = Some(Arc::clone(&session));
                Some(session)
            }
            Err(e) => {
                error!(error = %e, "unable to open outbox session");
                None
            }
        }
    }
}

impl EventSink for TransactionalEventSink {
    fn queue_event(&self, uow: &mut UnitOfWork, event: EventRecord) {
        if self.filter.should_filter(&event) {
            debug!(
                event_type = %event.event_type,
                target = %event.target,
                "event filtered"
            );
            return;
        }

        let message = match event.to_message() {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, target = %event.target, "unable to serialize event");
                return;
            }
        };

        let Some(session) = self.session(uow) else {
            return;
        };
        let destination = message.destination.clone();
        match session.send(message) {
            Ok(()) => {
                uow.queued += 1;
                debug!(destination = %destination, queued = uow.queued, "event queued");
            }
            Err(e) => {
                error!(destination = %destination, error = %e, "unable to queue event");
                if e.is_connectivity() {
                    if let Some((session, _)) = uow.take() {
                        session.close();
                    }
                }
            }
        }
    }

    fn send_events(&self, uow: &mut UnitOfWork) {
        let Some((session, queued)) = uow.take() else {
            debug!("no events to send");
            return;
        };

        match session.commit() {
            Ok(()) => debug!(count = queued, "events sent"),
            Err(e) => error!(count = queued, error = %e, "unable to send events"),
        }
        session.close();
    }

    fn rollback(&self, uow: &mut UnitOfWork) {
        let Some((session, queued)) = uow.take() else {
            return;
        };

        if let Err(e) = session.rollback() {
            warn!(error = %e, "outbox rollback failed");
        }
        session.close();
        debug!(count = queued, "queued events discarded");
    }
}
