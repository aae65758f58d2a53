//! Receiver integration tests.
//!
//! Receivers consume listener and job queues on the primary broker:
//! - handled messages are acknowledged, failures discarded
//! - connectivity failures leave messages for redelivery
//! - pause and resume never lose messages
//! - job workers only take the enabled job keys
//! - queue health covers both brokers

#[path = "../support/mod.rs"]
mod support;

mod delivery;
mod health;
mod jobs;

use std::sync::Arc;
use std::time::Duration;

use audit_bus::bus::{InMemoryBroker, Session};
use audit_bus::connection::{EgressConnection, IngressConnection};
use audit_bus::{EventConfig, EventRecord, ReceiverManager};

/// Everything a receiver test needs, wired to its own broker.
pub struct Fixture {
    pub broker: InMemoryBroker,
    pub ingress: Arc<IngressConnection>,
    pub egress: EgressConnection,
}

impl Fixture {
    pub fn new() -> Self {
        support::init_tracing();
        let (directory, broker) = support::primary();
        let config = EventConfig::default();
        let ingress = Arc::new(IngressConnection::from_config(&config, &directory).unwrap());
        let egress = EgressConnection::primary(&config, &directory).unwrap();
        Self {
            broker,
            ingress,
            egress,
        }
    }

    pub fn manager(&self) -> ReceiverManager {
        ReceiverManager::new(
            Arc::clone(&self.ingress),
            Duration::from_millis(10),
            Duration::from_millis(20),
        )
    }

    /// Publish and commit events in one session.
    pub fn publish(&self, events: &[EventRecord]) {
        let session = self.egress.create_session().unwrap();
        for event in events {
            session.send(event.to_message().unwrap()).unwrap();
        }
        session.commit().unwrap();
        session.close();
    }
}
