//! Built-in event listeners and the registry that builds them from
//! configured ids.

mod audit_store;
mod logging;
mod registry;

pub use audit_store::{AuditStoreListener, EventStore, InMemoryEventStore, AUDIT_STORE_LISTENER};
pub use logging::{LoggingListener, LOGGING_LISTENER};
pub use registry::ListenerRegistry;
