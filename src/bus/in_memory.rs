//! In-memory broker for tests and single-process deployments.
//!
//! Thread-safe and cheap to clone: every clone is another handle to the same
//! exchanges and queues. Supports:
//! - topic exchanges with `*` (one word) and `#` (zero or more words) bindings
//! - direct delivery to a queue named like the routing key
//! - transacted sessions with redelivery on rollback or close
//! - per-queue flow control and a whole-broker outage switch
//!
//! ```
//! use std::time::Duration;
//! use audit_bus::bus::{InMemoryBroker, Message};
//!
//! let broker = InMemoryBroker::new("0");
//! broker.declare_exchange("event");
//! let session = broker.open_session("event").unwrap();
//! session.declare_queue("event.audit", Some("#")).unwrap();
//!
//! session.send(Message::new("consumer.created", b"{}".to_vec())).unwrap();
//! session.commit().unwrap();
//!
//! let consumer = session.create_consumer("event.audit", None).unwrap();
//! let delivery = consumer.receive(Duration::from_millis(10)).unwrap().unwrap();
//! assert_eq!(delivery.message.destination, "consumer.created");
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::secondary::ManagementClient;

use super::broker::{Consumer, Session, SessionFactory};
use super::message::{Delivery, Message, QueueStatus};
use super::selector::Selector;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    flow_stopped: bool,
    last_message_id: Option<String>,
}

#[derive(Default)]
struct SessionState {
    pending: Vec<Message>,
    acked: BTreeSet<u64>,
}

struct InFlight {
    session: u64,
    consumer: u64,
    delivery: Delivery,
}

#[derive(Default)]
struct BrokerState {
    unavailable: bool,
    /// Bumped on every outage; sessions from an older generation are dead.
    generation: u64,
    exchanges: BTreeMap<String, Vec<(String, String)>>,
    queues: BTreeMap<String, QueueState>,
    sessions: HashMap<u64, SessionState>,
    in_flight: BTreeMap<u64, InFlight>,
    next_id: u64,
    management_latency: Duration,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.unavailable {
            Err(BrokerError::Unavailable("broker is not reachable".into()))
        } else {
            Ok(())
        }
    }

    /// Queues a message with this routing key lands in, in name order.
    fn routes(&self, exchange: &str, routing_key: &str) -> BTreeSet<String> {
        let mut targets = BTreeSet::new();
        if let Some(bindings) = self.exchanges.get(exchange) {
            for (pattern, queue) in bindings {
                if topic_matches(pattern, routing_key) {
                    targets.insert(queue.clone());
                }
            }
        }
        if self.queues.contains_key(routing_key) {
            targets.insert(routing_key.to_string());
        }
        targets
    }

    fn first_flow_stopped<'a>(&self, targets: impl IntoIterator<Item = &'a String>) -> Option<String> {
        targets
            .into_iter()
            .find(|q| self.queues.get(*q).is_some_and(|state| state.flow_stopped))
            .cloned()
    }

    /// Return in-flight deliveries selected by `pred` to the head of their queues.
    fn requeue_where(&mut self, pred: impl Fn(&InFlight) -> bool) -> usize {
        let tags: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| pred(f))
            .map(|(tag, _)| *tag)
            .collect();

        // Highest tag first so the oldest delivery ends up at the head.
        for tag in tags.iter().rev() {
            if let Some(InFlight { mut delivery, .. }) = self.in_flight.remove(tag) {
                delivery.redelivered = true;
                if let Some(queue) = self.queues.get_mut(&delivery.queue) {
                    queue.ready.push_front(delivery);
                }
            }
        }
        tags.len()
    }

    /// Settle acknowledged deliveries and return the rest for the session.
    fn finish_session(&mut self, session: u64, settle_acked: bool) {
        let acked = match self.sessions.get_mut(&session) {
            Some(state) => {
                state.pending.clear();
                std::mem::take(&mut state.acked)
            }
            None => BTreeSet::new(),
        };
        let settled = if settle_acked { acked } else { BTreeSet::new() };
        for tag in &settled {
            self.in_flight.remove(tag);
        }
        self.requeue_where(|f| f.session == session && !settled.contains(&f.delivery.tag));
    }

    fn queue_status(&self, queue: &str) -> Result<QueueStatus, BrokerError> {
        let state = self
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::Rejected(format!("no such queue: {}", queue)))?;
        let in_flight = self
            .in_flight
            .values()
            .filter(|f| f.delivery.queue == queue)
            .count();
        Ok(QueueStatus {
            queue_name: queue.to_string(),
            pending_message_count: state.ready.len() + in_flight,
            last_message_id: state.last_message_id.clone(),
        })
    }
}

struct Shared {
    name: String,
    state: Mutex<BrokerState>,
    arrived: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A named, thread-safe in-memory broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl InMemoryBroker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(BrokerState::default()),
                arrived: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Create the exchange if it does not exist.
    pub fn declare_exchange(&self, exchange: &str) {
        self.shared.lock().exchanges.entry(exchange.to_string()).or_default();
    }

    /// Remove an exchange and all of its bindings.
    pub fn delete_exchange(&self, exchange: &str) {
        self.shared.lock().exchanges.remove(exchange);
    }

    /// Create a durable queue if it does not exist.
    pub fn declare_queue(&self, queue: &str) {
        self.shared.lock().queues.entry(queue.to_string()).or_default();
    }

    /// Bind a queue to an exchange, creating both if needed.
    pub fn bind(&self, exchange: &str, binding_key: &str, queue: &str) {
        let mut state = self.shared.lock();
        state.queues.entry(queue.to_string()).or_default();
        let bindings = state.exchanges.entry(exchange.to_string()).or_default();
        let binding = (binding_key.to_string(), queue.to_string());
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
    }

    /// Remove every binding from `exchange` to `queue`.
    pub fn unbind(&self, exchange: &str, queue: &str) {
        if let Some(bindings) = self.shared.lock().exchanges.get_mut(exchange) {
            bindings.retain(|(_, q)| q != queue);
        }
    }

    /// Toggle flow control on a queue.
    pub fn set_flow_stopped(&self, queue: &str, stopped: bool) {
        let mut state = self.shared.lock();
        state.queues.entry(queue.to_string()).or_default().flow_stopped = stopped;
    }

    /// Simulate an outage. Going down kills every open session and consumer,
    /// returning their unsettled deliveries.
    pub fn set_available(&self, available: bool) {
        let mut state = self.shared.lock();
        if state.unavailable == !available {
            return;
        }
        state.unavailable = !available;
        if !available {
            state.generation += 1;
            let sessions: Vec<u64> = state.sessions.keys().copied().collect();
            for session in sessions {
                state.finish_session(session, false);
            }
            state.sessions.clear();
            warn!(broker = %self.shared.name, "broker marked unavailable");
        } else {
            debug!(broker = %self.shared.name, "broker available again");
        }
        drop(state);
        self.shared.arrived.notify_all();
    }

    pub fn is_available(&self) -> bool {
        !self.shared.lock().unavailable
    }

    /// Delay applied to management queries, to exercise query timeouts.
    pub fn set_management_latency(&self, latency: Duration) {
        self.shared.lock().management_latency = latency;
    }

    /// Open a session publishing through `exchange`.
    pub fn open_session(&self, exchange: &str) -> Result<Arc<dyn Session>, BrokerError> {
        let mut state = self.shared.lock();
        state.check_available()?;
        let id = state.next_id();
        state.sessions.insert(id, SessionState::default());
        Ok(Arc::new(InMemorySession {
            shared: Arc::clone(&self.shared),
            id,
            generation: state.generation,
            exchange: exchange.to_string(),
            large_message_size: usize::MAX,
            closed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    /// Messages waiting in a queue, oldest first, without consuming them.
    pub fn browse(&self, queue: &str) -> Vec<Message> {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|d| d.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of messages in a queue, ready or in flight.
    pub fn depth(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queue_status(queue)
            .map(|s| s.pending_message_count)
            .unwrap_or(0)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.shared.lock().queues.keys().cloned().collect()
    }

    fn management<T>(
        &self,
        query: impl FnOnce(&BrokerState) -> T,
        timeout: Duration,
    ) -> Result<T, BrokerError> {
        let latency = self.shared.lock().management_latency;
        if latency > timeout {
            std::thread::sleep(timeout);
            return Err(BrokerError::Unavailable(format!(
                "management query timed out after {:?}",
                timeout
            )));
        }
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        let state = self.shared.lock();
        state.check_available()?;
        Ok(query(&state))
    }

    /// Management view of this broker whose queries give up after `timeout`.
    pub fn management_client(&self, timeout: Duration) -> InMemoryManagement {
        InMemoryManagement {
            broker: self.clone(),
            timeout,
        }
    }
}

/// [`ManagementClient`] over an [`InMemoryBroker`].
#[derive(Clone, Debug)]
pub struct InMemoryManagement {
    broker: InMemoryBroker,
    timeout: Duration,
}

impl ManagementClient for InMemoryManagement {
    fn exchange_exists(&self, exchange: &str) -> Result<bool, BrokerError> {
        self.broker
            .management(|s| s.exchanges.contains_key(exchange), self.timeout)
    }

    fn binding_count(&self, exchange: &str) -> Result<usize, BrokerError> {
        self.broker.management(
            |s| s.exchanges.get(exchange).map(Vec::len).unwrap_or(0),
            self.timeout,
        )
    }

    fn bound_queues(&self, exchange: &str) -> Result<Vec<String>, BrokerError> {
        self.broker.management(
            |s| {
                let queues: BTreeSet<String> = s
                    .exchanges
                    .get(exchange)
                    .map(|b| b.iter().map(|(_, q)| q.clone()).collect())
                    .unwrap_or_default();
                queues.into_iter().collect()
            },
            self.timeout,
        )
    }

    fn queue_flow_stopped(&self, queue: &str) -> Result<bool, BrokerError> {
        self.broker.management(
            |s| s.queues.get(queue).is_some_and(|q| q.flow_stopped),
            self.timeout,
        )
    }

    fn queue_depth(&self, queue: &str) -> Result<QueueStatus, BrokerError> {
        self.broker
            .management(|s| s.queue_status(queue), self.timeout)?
    }
}

/// Session factory for one connection to an [`InMemoryBroker`].
///
/// With `reattach` set the factory survives outages and resumes handing out
/// sessions once the broker is back. Without it, an outage closes the
/// factory for good. Closing the factory closes every session it created.
pub struct InMemorySessionFactory {
    broker: InMemoryBroker,
    exchange: String,
    large_message_size: usize,
    reattach: bool,
    generation: u64,
    closed: AtomicBool,
    sessions: Mutex<Vec<Weak<InMemorySession>>>,
}

impl InMemorySessionFactory {
    pub fn connect(
        broker: InMemoryBroker,
        exchange: impl Into<String>,
        large_message_size: usize,
        reattach: bool,
    ) -> Result<Self, BrokerError> {
        let generation = {
            let state = broker.shared.lock();
            state.check_available()?;
            state.generation
        };
        Ok(Self {
            broker,
            exchange: exchange.into(),
            large_message_size,
            reattach,
            generation,
            closed: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }
}

impl SessionFactory for InMemorySessionFactory {
    fn create_session(&self) -> Result<Arc<dyn Session>, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed("session factory is closed".into()));
        }
        let mut state = self.broker.shared.lock();
        state.check_available()?;
        let id = state.next_id();
        state.sessions.insert(id, SessionState::default());
        let session = Arc::new(InMemorySession {
            shared: Arc::clone(&self.broker.shared),
            id,
            generation: state.generation,
            exchange: self.exchange.clone(),
            large_message_size: self.large_message_size,
            closed: AtomicBool::new(false),
        });
        drop(state);

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|s| s.strong_count() > 0);
        sessions.push(Arc::downgrade(&session));
        Ok(session as Arc<dyn Session>)
    }

    fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        !self.reattach && self.broker.generation() != self.generation
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sessions =
            std::mem::take(&mut *self.sessions.lock().unwrap_or_else(PoisonError::into_inner));
        for session in sessions.iter().filter_map(Weak::upgrade) {
            Session::close(session.as_ref());
        }
    }
}

struct InMemorySession {
    shared: Arc<Shared>,
    id: u64,
    generation: u64,
    exchange: String,
    large_message_size: usize,
    closed: AtomicBool,
}

impl InMemorySession {
    /// Lock the broker, failing if this session is no longer usable.
    fn open_state(&self) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
        let state = self.shared.lock();
        state.check_available()?;
        if self.closed.load(Ordering::SeqCst)
            || state.generation != self.generation
            || !state.sessions.contains_key(&self.id)
        {
            return Err(BrokerError::Closed("session is closed".into()));
        }
        Ok(state)
    }
}

impl Session for InMemorySession {
    fn send(&self, mut message: Message) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        let targets = state.routes(&self.exchange, &message.destination);
        if let Some(queue) = state.first_flow_stopped(&targets) {
            return Err(BrokerError::FlowStopped { queue });
        }
        if message.payload.len() > self.large_message_size {
            message.large = true;
            debug!(
                destination = %message.destination,
                size = message.payload.len(),
                "sending large message"
            );
        }
        if let Some(session) = state.sessions.get_mut(&self.id) {
            session.pending.push(message);
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;

        let pending = state
            .sessions
            .get(&self.id)
            .map(|s| s.pending.clone())
            .unwrap_or_default();
        let routed: Vec<(Message, BTreeSet<String>)> = pending
            .into_iter()
            .map(|m| {
                let targets = state.routes(&self.exchange, &m.destination);
                (m, targets)
            })
            .collect();
        if let Some(queue) = routed
            .iter()
            .find_map(|(_, targets)| state.first_flow_stopped(targets))
        {
            return Err(BrokerError::FlowStopped { queue });
        }

        for (mut message, targets) in routed {
            if targets.is_empty() {
                debug!(destination = %message.destination, "dropping unroutable message");
                continue;
            }
            let id = format!("ID:{}-{}", self.shared.name, state.next_id());
            message.id = Some(id.clone());
            for queue in targets {
                let tag = state.next_id();
                if let Some(q) = state.queues.get_mut(&queue) {
                    q.last_message_id = Some(id.clone());
                    q.ready.push_back(Delivery {
                        tag,
                        queue: queue.clone(),
                        message: message.clone(),
                        redelivered: false,
                    });
                }
            }
        }

        let acked = match state.sessions.get_mut(&self.id) {
            Some(session) => {
                session.pending.clear();
                std::mem::take(&mut session.acked)
            }
            None => BTreeSet::new(),
        };
        for tag in acked {
            state.in_flight.remove(&tag);
        }

        drop(state);
        self.shared.arrived.notify_all();
        Ok(())
    }

    fn rollback(&self) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        state.finish_session(self.id, true);
        drop(state);
        self.shared.arrived.notify_all();
        Ok(())
    }

    fn declare_queue(&self, queue: &str, binding_key: Option<&str>) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        state.queues.entry(queue.to_string()).or_default();
        if let Some(key) = binding_key {
            let bindings = state
                .exchanges
                .get_mut(&self.exchange)
                .ok_or_else(|| BrokerError::Rejected(format!("no such exchange: {}", self.exchange)))?;
            let binding = (key.to_string(), queue.to_string());
            if !bindings.contains(&binding) {
                bindings.push(binding);
            }
        }
        Ok(())
    }

    fn create_consumer(
        &self,
        queue: &str,
        selector: Option<&Selector>,
    ) -> Result<Arc<dyn Consumer>, BrokerError> {
        let mut state = self.open_state()?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::Rejected(format!("no such queue: {}", queue)));
        }
        let id = state.next_id();
        Ok(Arc::new(InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            id,
            session: self.id,
            generation: self.generation,
            queue: queue.to_string(),
            selector: selector.cloned(),
            closed: AtomicBool::new(false),
        }))
    }

    fn queue_status(&self, queue: &str) -> Result<QueueStatus, BrokerError> {
        self.open_state()?.queue_status(queue)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.shared.lock();
        if state.sessions.contains_key(&self.id) {
            state.finish_session(self.id, true);
            state.sessions.remove(&self.id);
        }
        drop(state);
        self.shared.arrived.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.open_state().is_err()
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        Session::close(self);
    }
}

struct InMemoryConsumer {
    shared: Arc<Shared>,
    id: u64,
    session: u64,
    generation: u64,
    queue: String,
    selector: Option<Selector>,
    closed: AtomicBool,
}

impl InMemoryConsumer {
    fn check_open(&self, state: &BrokerState) -> Result<(), BrokerError> {
        state.check_available()?;
        if self.closed.load(Ordering::SeqCst)
            || state.generation != self.generation
            || !state.sessions.contains_key(&self.session)
        {
            return Err(BrokerError::Closed(format!("consumer on {} is closed", self.queue)));
        }
        Ok(())
    }
}

impl Consumer for InMemoryConsumer {
    fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();

        loop {
            self.check_open(&state)?;

            let selector = self.selector.as_ref();
            let next = state.queues.get_mut(&self.queue).and_then(|q| {
                let index = q
                    .ready
                    .iter()
                    .position(|d| selector.map_or(true, |s| s.matches(&d.message)))?;
                q.ready.remove(index)
            });
            if let Some(delivery) = next {
                state.in_flight.insert(
                    delivery.tag,
                    InFlight {
                        session: self.session,
                        consumer: self.id,
                        delivery: delivery.clone(),
                    },
                );
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .shared
                .arrived
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn acknowledge(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.shared.lock();
        self.check_open(&state)?;
        if !state.in_flight.contains_key(&delivery.tag) {
            return Err(BrokerError::Rejected(format!(
                "unknown delivery tag {}",
                delivery.tag
            )));
        }
        if let Some(session) = state.sessions.get_mut(&self.session) {
            session.acked.insert(delivery.tag);
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.shared.lock();
        let acked = state
            .sessions
            .get(&self.session)
            .map(|s| s.acked.clone())
            .unwrap_or_default();
        let consumer = self.id;
        state.requeue_where(|f| f.consumer == consumer && !acked.contains(&f.delivery.tag));
        drop(state);
        self.shared.arrived.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.check_open(&self.shared.lock()).is_err()
    }
}

/// AMQP-style topic match over `.`-separated words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}
