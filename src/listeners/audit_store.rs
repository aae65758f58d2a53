use std::sync::{Arc, RwLock};

use tracing::debug;
use uuid::Uuid;

use crate::error::ListenerError;
use crate::event::EventRecord;
use crate::receiver::EventListener;

pub const AUDIT_STORE_LISTENER: &str = "audit_bus.AuditStoreListener";

/// Durable storage for consumed events.
pub trait EventStore: Send + Sync {
    fn save(&self, event: EventRecord) -> Result<(), ListenerError>;
}

/// Append-only event store kept in memory. Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventRecord>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events
            .read()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for InMemoryEventStore {
    fn save(&self, event: EventRecord) -> Result<(), ListenerError> {
        self.events
            .write()
            .map_err(|_| ListenerError::Failed("event store lock poisoned".into()))?
            .push(event);
        Ok(())
    }
}

/// Persists every event it receives, assigning the record its id.
pub struct AuditStoreListener {
    store: Arc<dyn EventStore>,
}

impl AuditStoreListener {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

impl EventListener for AuditStoreListener {
    fn name(&self) -> &str {
        AUDIT_STORE_LISTENER
    }

    fn on_event(&self, event: &EventRecord) -> Result<(), ListenerError> {
        let id = Uuid::new_v4().to_string();
        debug!(id = %id, destination = %event.destination(), "storing event");
        self.store.save(event.clone().with_id(id))
    }
}
