use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bus::QueueStatus;
use crate::connection::IngressConnection;
use crate::error::BrokerError;
use crate::event::listener_queue_name;
use crate::secondary::{ConnectionState, ManagementClient, StatusListener};

use super::job::{job_selector, JobDispatch, JobDispatcher, JOBS_DESTINATION};
use super::listener::{EventDispatch, EventListener};
use super::message_receiver::{MessageReceiver, ReceiverKind, ReceiverSpec};

/// Binding that routes every event destination (`target.type`) to a
/// listener queue. Single-word keys such as the job queue's do not match.
pub const EVENT_DESTINATIONS: &str = "*.*";

/// Owns every receiver and reports on their queues.
///
/// Registered with the secondary broker monitor, it pauses the receivers
/// that feed the secondary broker while it is in any state other than
/// connected, and resumes them once it is connected again. Their messages
/// wait on the primary broker meanwhile.
pub struct ReceiverManager {
    connection: Arc<IngressConnection>,
    poll_interval: Duration,
    retry_interval: Duration,
    receivers: Vec<MessageReceiver>,
    secondary: Option<(Arc<dyn ManagementClient>, String)>,
}

impl ReceiverManager {
    pub fn new(
        connection: Arc<IngressConnection>,
        poll_interval: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            connection,
            poll_interval,
            retry_interval,
            receivers: Vec::new(),
            secondary: None,
        }
    }

    /// Include the secondary broker's queues bound to `exchange` in health reports.
    pub fn with_secondary(mut self, client: Arc<dyn ManagementClient>, exchange: impl Into<String>) -> Self {
        self.secondary = Some((client, exchange.into()));
        self
    }

    /// Add a receiver for a listener, on the queue named after it.
    pub fn add_listener(&mut self, listener: Arc<dyn EventListener>) -> &MessageReceiver {
        let kind = if listener.requires_secondary_bus() {
            ReceiverKind::Secondary
        } else {
            ReceiverKind::Standard
        };
        let spec = ReceiverSpec {
            queue: listener_queue_name(listener.name()),
            binding_key: Some(EVENT_DESTINATIONS.to_string()),
            selector: None,
            kind,
            poll_interval: self.poll_interval,
            retry_interval: self.retry_interval,
        };
        let name = listener.name().to_string();
        let handler = Arc::new(EventDispatch::new(listener));
        self.push(MessageReceiver::new(name, spec, Arc::clone(&self.connection), handler))
    }

    /// Add `workers` receivers on the job queue, limited to `keys`.
    pub fn add_job_workers(
        &mut self,
        dispatcher: Arc<dyn JobDispatcher>,
        keys: &[String],
        workers: usize,
    ) {
        if keys.is_empty() {
            return;
        }
        let selector = job_selector(keys.iter().cloned());
        let handler = Arc::new(JobDispatch::new(dispatcher));
        for n in 0..workers {
            let spec = ReceiverSpec {
                queue: JOBS_DESTINATION.to_string(),
                binding_key: None,
                selector: Some(selector.clone()),
                kind: ReceiverKind::Job,
                poll_interval: self.poll_interval,
                retry_interval: self.retry_interval,
            };
            self.push(MessageReceiver::new(
                format!("job-worker-{}", n),
                spec,
                Arc::clone(&self.connection),
                handler.clone(),
            ));
        }
        debug!(workers, selector = %selector, "job receivers added");
    }

    fn push(&mut self, receiver: MessageReceiver) -> &MessageReceiver {
        self.receivers.push(receiver);
        &self.receivers[self.receivers.len() - 1]
    }

    pub fn receivers(&self) -> &[MessageReceiver] {
        &self.receivers
    }

    pub fn receiver(&self, name: &str) -> Option<&MessageReceiver> {
        self.receivers.iter().find(|r| r.name() == name)
    }

    /// Connect every receiver. Failures are logged and the first is returned
    /// after all receivers were tried.
    pub fn connect_all(&self) -> Result<(), BrokerError> {
        let mut first = None;
        for receiver in &self.receivers {
            if let Err(e) = receiver.connect() {
                warn!(queue = %receiver.queue_name(), error = %e, "unable to connect receiver");
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => {
                info!(receivers = self.receivers.len(), "receivers connected");
                Ok(())
            }
        }
    }

    pub fn pause_all(&self) {
        self.receivers.iter().for_each(MessageReceiver::pause);
    }

    pub fn resume_all(&self) {
        for receiver in &self.receivers {
            resume_or_reconnect(receiver);
        }
    }

    pub fn close_all(&self) {
        self.receivers.iter().for_each(MessageReceiver::close);
        info!("receivers closed");
    }

    /// One entry per queue, sorted by queue name.
    pub fn get_queue_info(&self) -> Vec<QueueStatus> {
        self.queue_health().into_values().collect()
    }

    /// Queue name to status, for listener queues and, when configured and
    /// reachable, the secondary broker's queues.
    pub fn queue_health(&self) -> BTreeMap<String, QueueStatus> {
        let mut health = BTreeMap::new();
        for receiver in &self.receivers {
            if health.contains_key(receiver.queue_name()) {
                continue;
            }
            match receiver.queue_status() {
                Ok(status) => {
                    health.insert(status.queue_name.clone(), status);
                }
                Err(e) => {
                    debug!(queue = %receiver.queue_name(), error = %e, "queue status unavailable")
                }
            }
        }

        if let Some((client, exchange)) = &self.secondary {
            match client.bound_queues(exchange) {
                Ok(queues) => {
                    for queue in queues {
                        match client.queue_depth(&queue) {
                            Ok(status) => {
                                health.insert(queue, status);
                            }
                            Err(e) => debug!(queue = %queue, error = %e, "secondary queue status unavailable"),
                        }
                    }
                }
                Err(e) => debug!(error = %e, "secondary broker unreachable, reporting primary queues only"),
            }
        }
        health
    }

    fn secondary_receivers(&self) -> impl Iterator<Item = &MessageReceiver> {
        self.receivers
            .iter()
            .filter(|r| r.kind() == ReceiverKind::Secondary)
    }
}

impl StatusListener for ReceiverManager {
    fn on_status_update(&self, _old: ConnectionState, new: ConnectionState) {
        match new {
            ConnectionState::Down
            | ConnectionState::FlowStopped
            | ConnectionState::MissingExchange
            | ConnectionState::MissingBinding => {
                for receiver in self.secondary_receivers() {
                    receiver.request_pause();
                }
            }
            ConnectionState::Connected => {
                for receiver in self.secondary_receivers() {
                    resume_or_reconnect(receiver);
                }
            }
            _ => {}
        }
    }
}

/// Resume a receiver, restoring its session first if it went down while paused.
fn resume_or_reconnect(receiver: &MessageReceiver) {
    if receiver.is_closed() || receiver.resume() {
        return;
    }
    match receiver.connect() {
        Ok(()) => {
            receiver.resume();
        }
        Err(e) => warn!(queue = %receiver.queue_name(), error = %e, "unable to reconnect receiver"),
    }
}
