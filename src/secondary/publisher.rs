use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bus::Session;
use crate::connection::EgressConnection;
use crate::error::{BrokerError, ListenerError};
use crate::event::{EventRecord, RouteTable};
use crate::receiver::EventListener;

use super::{ConnectionState, StatusListener};

/// Identity of the secondary bus listener.
pub const SECONDARY_BUS_LISTENER: &str = "audit_bus.SecondaryBusPublisher";

/// Forwards consumed events to the secondary broker's exchange.
///
/// Keeps one publishing session per route, created on first use. Follows
/// the secondary broker's health:
/// - going down closes every route session and the connection,
/// - coming back from down rebuilds them,
/// - while flow stopped, publishing fails fast with [`BrokerError::FlowStopped`].
///
/// A publish waiting between retries gives up as soon as the broker is
/// reported down or flow stopped, so status callbacks never wait on it.
pub struct SecondaryBusPublisher {
    connection: Arc<EgressConnection>,
    exchange: String,
    routes: RouteTable,
    publishers: Mutex<HashMap<String, Arc<dyn Session>>>,
    health: Mutex<Health>,
    health_changed: Condvar,
    retry_attempts: u32,
    retry_interval: Duration,
}

#[derive(Default)]
struct Health {
    down: bool,
    flow_stopped: bool,
}

impl Health {
    fn halted(&self) -> bool {
        self.down || self.flow_stopped
    }
}

impl SecondaryBusPublisher {
    pub fn new(
        connection: Arc<EgressConnection>,
        exchange: impl Into<String>,
        retry_attempts: u32,
        retry_interval: Duration,
    ) -> Self {
        Self {
            connection,
            exchange: exchange.into(),
            routes: RouteTable::new(),
            publishers: Mutex::new(HashMap::new()),
            health: Mutex::new(Health::default()),
            health_changed: Condvar::new(),
            retry_attempts,
            retry_interval,
        }
    }

    fn publishers(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Session>>> {
        self.publishers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of open route sessions.
    pub fn open_routes(&self) -> usize {
        self.publishers()
            .values()
            .filter(|s| !s.is_closed())
            .count()
    }

    fn health(&self) -> MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_flow_stopped(&self) -> bool {
        self.health().flow_stopped
    }

    /// Wait out the retry interval. Returns false if the broker was reported
    /// down or flow stopped, before or during the wait.
    fn wait_for_retry(&self) -> bool {
        let health = self.health();
        if health.halted() {
            return false;
        }
        let (health, _) = self
            .health_changed
            .wait_timeout_while(health, self.retry_interval, |h| !h.halted())
            .unwrap_or_else(PoisonError::into_inner);
        !health.halted()
    }

    fn route_session(&self, destination: &str) -> Result<Arc<dyn Session>, BrokerError> {
        let mut publishers = self.publishers();
        if let Some(session) = publishers.get(destination) {
            if !session.is_closed() {
                return Ok(Arc::clone(session));
            }
        }
        let session = self.connection.create_session()?;
        publishers.insert(destination.to_string(), Arc::clone(&session));
        Ok(session)
    }

    fn drop_route(&self, destination: &str) {
        if let Some(session) = self.publishers().remove(destination) {
            session.close();
        }
    }

    /// Publish one event to its route, retrying connectivity failures.
    pub fn publish(&self, event: &EventRecord) -> Result<(), BrokerError> {
        if self.is_flow_stopped() {
            return Err(BrokerError::FlowStopped {
                queue: self.exchange.clone(),
            });
        }

        let destination = self.routes.get(event.event_type, event.target);
        let message = event.to_message()?;
        let attempts = self.retry_attempts.max(1);

        let mut attempt = 1;
        loop {
            let result = self.route_session(destination).and_then(|session| {
                session.send(message.clone())?;
                session.commit()
            });
            match result {
                Ok(()) => {
                    debug!(destination = %destination, "event forwarded to secondary broker");
                    return Ok(());
                }
                Err(e) if e.is_connectivity() && attempt < attempts => {
                    warn!(
                        destination = %destination,
                        attempt,
                        error = %e,
                        "secondary publish failed, retrying"
                    );
                    self.drop_route(destination);
                    attempt += 1;
                    if !self.wait_for_retry() {
                        debug!(destination = %destination, "secondary broker unhealthy, giving up retries");
                        return Err(e);
                    }
                }
                Err(e) => {
                    if e.is_connectivity() {
                        self.drop_route(destination);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Close every route session.
    pub fn close_all(&self) {
        let sessions: Vec<Arc<dyn Session>> = self.publishers().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.close();
        }
        debug!(closed = sessions.len(), "secondary route sessions closed");
    }

    /// Recreate a session for every route. Failures are logged; the route
    /// is created again on its next publish.
    pub fn rebuild_all(&self) {
        self.close_all();
        let mut rebuilt = 0;
        for destination in self.routes.destinations() {
            match self.route_session(destination) {
                Ok(_) => rebuilt += 1,
                Err(e) => {
                    warn!(error = %e, "unable to rebuild secondary route sessions");
                    break;
                }
            }
        }
        info!(routes = rebuilt, "secondary route sessions rebuilt");
    }
}

impl EventListener for SecondaryBusPublisher {
    fn name(&self) -> &str {
        SECONDARY_BUS_LISTENER
    }

    fn on_event(&self, event: &EventRecord) -> Result<(), ListenerError> {
        Ok(self.publish(event)?)
    }

    fn requires_secondary_bus(&self) -> bool {
        true
    }
}

impl StatusListener for SecondaryBusPublisher {
    fn on_status_update(&self, old: ConnectionState, new: ConnectionState) {
        {
            let mut health = self.health();
            health.down = new == ConnectionState::Down;
            health.flow_stopped = new == ConnectionState::FlowStopped;
        }
        self.health_changed.notify_all();

        match (old, new) {
            (_, ConnectionState::Down) => {
                self.close_all();
                self.connection.close();
            }
            (ConnectionState::Down, ConnectionState::Connected) => self.rebuild_all(),
            _ => {}
        }
    }
}
