//! Outbox: event publication tied to a unit of work.

mod direct;
mod noop;
mod transactional;

use std::sync::Arc;

use tracing::warn;

use crate::bus::Session;
use crate::event::EventRecord;

pub use direct::DirectPublisher;
pub use noop::NoopEventSink;
pub use transactional::TransactionalEventSink;

/// Accepts events for the current unit of work.
///
/// None of these methods fail: publication trouble is logged and the
/// events are dropped, never surfaced to the business transaction.
pub trait EventSink: Send + Sync {
    /// Buffer an event for the unit of work, unless it is filtered.
    fn queue_event(&self, uow: &mut UnitOfWork, event: EventRecord);

    /// Publish everything buffered, in queue order, and release the session.
    /// Call once, after the business transaction committed.
    fn send_events(&self, uow: &mut UnitOfWork);

    /// Discard everything buffered and release the session.
    fn rollback(&self, uow: &mut UnitOfWork);
}

/// The outbox slot of one request or job.
///
/// Holds the lazily opened publishing session. Must not be shared across
/// concurrent contexts; dropping it with a session still open rolls back.
#[derive(Default)]
pub struct UnitOfWork {
    session: Option<Arc<dyn Session>>,
    queued: usize,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a publishing session is currently open.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Events buffered since the session was opened.
    pub fn queued(&self) -> usize {
        self.queued
    }

    fn take(&mut self) -> Option<(Arc<dyn Session>, usize)> {
        let queued = std::mem::take(&mut self.queued);
        self.session.take().map(|s| (s, queued))
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("active", &self.is_active())
            .field("queued", &self.queued)
            .finish()
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if let Some((session, queued)) = self.take() {
            warn!(queued, "unit of work dropped with an open session, rolling back");
            if let Err(e) = session.rollback() {
                warn!(error = %e, "rollback of abandoned unit of work failed");
            }
            session.close();
        }
    }
}
