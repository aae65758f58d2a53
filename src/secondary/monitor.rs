use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::management::ManagementClient;
use super::{ConnectionState, StatusListener};

#[derive(Default)]
struct Observed {
    state: ConnectionState,
    flow_stopped_queue: Option<String>,
}

/// Derives the secondary broker's health from its management interface and
/// tells registered listeners about every change.
///
/// Each poll runs the checks in order and stops at the first failing one:
/// exchange exists, exchange has bindings, no bound queue is flow stopped.
/// A failed query means the broker is down.
///
/// Listeners are only told about transitions. The initial `Unknown` state
/// is assumed healthy, so a first poll that finds the broker connected is
/// not reported.
pub struct SecondaryBrokerStatusMonitor {
    client: Arc<dyn ManagementClient>,
    exchange: String,
    observed: Mutex<Observed>,
    listeners: RwLock<Vec<Arc<dyn StatusListener>>>,
}

impl SecondaryBrokerStatusMonitor {
    pub fn new(client: Arc<dyn ManagementClient>, exchange: impl Into<String>) -> Self {
        Self {
            client,
            exchange: exchange.into(),
            observed: Mutex::new(Observed::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn register(&self, listener: Arc<dyn StatusListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Last recorded state.
    pub fn state(&self) -> ConnectionState {
        self.observed().state
    }

    /// Queue that caused the last `FlowStopped` state.
    pub fn flow_stopped_queue(&self) -> Option<String> {
        self.observed().flow_stopped_queue.clone()
    }

    fn observed(&self) -> std::sync::MutexGuard<'_, Observed> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Query the broker and compute its state, without recording it.
    pub fn probe(&self) -> (ConnectionState, Option<String>) {
        match self.check() {
            Ok(result) => result,
            Err(e) => {
                debug!(exchange = %self.exchange, error = %e, "management query failed");
                (ConnectionState::Down, None)
            }
        }
    }

    fn check(&self) -> Result<(ConnectionState, Option<String>), crate::error::BrokerError> {
        if !self.client.exchange_exists(&self.exchange)? {
            return Ok((ConnectionState::MissingExchange, None));
        }
        if self.client.binding_count(&self.exchange)? == 0 {
            return Ok((ConnectionState::MissingBinding, None));
        }
        for queue in self.client.bound_queues(&self.exchange)? {
            if self.client.queue_flow_stopped(&queue)? {
                return Ok((ConnectionState::FlowStopped, Some(queue)));
            }
        }
        Ok((ConnectionState::Connected, None))
    }

    /// Probe, record and notify. Returns the new state.
    pub fn poll(&self) -> ConnectionState {
        let (state, queue) = self.probe();
        self.record_observation(state, queue);
        state
    }

    /// Record a state computed elsewhere. Returns true if listeners were notified.
    pub fn record(&self, state: ConnectionState) -> bool {
        self.record_observation(state, None)
    }

    fn record_observation(&self, new: ConnectionState, queue: Option<String>) -> bool {
        let old = {
            let mut observed = self.observed();
            let old = observed.state;
            observed.state = new;
            observed.flow_stopped_queue = queue.clone();
            old
        };

        if new == ConnectionState::FlowStopped {
            if let Some(queue) = &queue {
                warn!(exchange = %self.exchange, queue = %queue, "secondary broker queue is flow stopped");
            }
        }

        let silent = old == new || (old == ConnectionState::Unknown && new == ConnectionState::Connected);
        if silent {
            return false;
        }

        info!(from = %old, to = %new, "secondary broker state changed");
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_status_update(old, new);
        }
        true
    }
}
