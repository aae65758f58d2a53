use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::bus::{properties, Consumer, Delivery, QueueStatus, Selector, Session};
use crate::connection::IngressConnection;
use crate::error::BrokerError;

use super::listener::MessageHandler;
use super::thread::DeliveryThread;

/// Which delivery path a receiver serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverKind {
    /// A listener on the primary broker.
    Standard,
    /// A listener feeding the secondary broker; paused while it is unhealthy.
    Secondary,
    /// A job worker.
    Job,
}

/// Counters of one receiver since it was created.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiverStats {
    pub messages_handled: usize,
    pub messages_discarded: usize,
    pub messages_retried: usize,
}

/// Where a receiver reads from and how long it waits.
#[derive(Debug, Clone)]
pub struct ReceiverSpec {
    pub queue: String,
    /// Binding to the event exchange, if the queue needs one.
    pub binding_key: Option<String>,
    pub selector: Option<Selector>,
    pub kind: ReceiverKind,
    pub poll_interval: Duration,
    pub retry_interval: Duration,
}

pub(crate) enum Outcome {
    Handled,
    Retry,
    Discarded,
}

#[derive(Default)]
struct ReceiverState {
    session: Option<Arc<dyn Session>>,
    consumer: Option<Arc<dyn Consumer>>,
    worker: Option<DeliveryThread>,
    paused: bool,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    handled: AtomicUsize,
    discarded: AtomicUsize,
    retried: AtomicUsize,
}

pub(crate) struct ReceiverInner {
    name: String,
    spec: ReceiverSpec,
    connection: Arc<IngressConnection>,
    handler: Arc<dyn MessageHandler>,
    state: Mutex<ReceiverState>,
    counters: Counters,
}

impl ReceiverInner {
    fn lock(&self) -> MutexGuard<'_, ReceiverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn queue(&self) -> &str {
        &self.spec.queue
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.spec.poll_interval
    }

    pub(crate) fn retry_interval(&self) -> Duration {
        self.spec.retry_interval
    }

    /// Session and consumer to read with, if both are usable.
    pub(crate) fn current(&self) -> Option<(Arc<dyn Session>, Arc<dyn Consumer>)> {
        let state = self.lock();
        match (&state.session, &state.consumer) {
            (Some(session), Some(consumer)) if !session.is_closed() && !consumer.is_closed() => {
                Some((Arc::clone(session), Arc::clone(consumer)))
            }
            _ => None,
        }
    }

    fn open_session(&self) -> Result<Arc<dyn Session>, BrokerError> {
        let session = self.connection.create_session()?;
        if let Err(e) = session.declare_queue(&self.spec.queue, self.spec.binding_key.as_deref()) {
            session.close();
            return Err(e);
        }
        Ok(session)
    }

    fn open_consumer(&self, session: &Arc<dyn Session>) -> Result<Arc<dyn Consumer>, BrokerError> {
        session.create_consumer(&self.spec.queue, self.spec.selector.as_ref())
    }

    /// Replace a dead session and consumer. Returns false when the receiver
    /// is paused or closed and delivery should stop.
    pub(crate) fn reopen(&self) -> Result<bool, BrokerError> {
        let mut state = self.lock();
        if state.paused || state.closed {
            return Ok(false);
        }
        if let Some(consumer) = state.consumer.take() {
            consumer.close();
        }
        if let Some(session) = state.session.take() {
            session.close();
        }

        let session = self.open_session()?;
        let consumer = match self.open_consumer(&session) {
            Ok(consumer) => consumer,
            Err(e) => {
                session.close();
                return Err(e);
            }
        };
        state.session = Some(session);
        state.consumer = Some(consumer);
        info!(queue = %self.spec.queue, "receiver reconnected");
        Ok(true)
    }

    /// Drop a session that failed, returning its unsettled deliveries.
    pub(crate) fn discard_session(&self, session: &Arc<dyn Session>) {
        let (consumer, current) = {
            let mut state = self.lock();
            if state
                .session
                .as_ref()
                .is_some_and(|s| Arc::ptr_eq(s, session))
            {
                (state.consumer.take(), state.session.take())
            } else {
                (None, None)
            }
        };
        if let Some(consumer) = consumer {
            consumer.close();
        }
        if let Some(current) = current {
            current.close();
        }
    }

    /// Hand one delivery to the handler and settle it.
    pub(crate) fn dispatch(
        &self,
        session: &Arc<dyn Session>,
        consumer: &Arc<dyn Consumer>,
        delivery: Delivery,
    ) -> Outcome {
        let queue = &self.spec.queue;
        let destination = &delivery.message.destination;

        if self.spec.kind == ReceiverKind::Secondary {
            if let Some(original) = delivery.message.property(properties::ORIGINAL_DESTINATION) {
                debug!(
                    queue = %queue,
                    original = %original,
                    destination = %destination,
                    "received diverted message"
                );
            }
        }
        if delivery.redelivered {
            debug!(queue = %queue, destination = %destination, "redelivered message");
        }

        match self.handler.handle(&delivery.message) {
            Ok(()) => match consumer
                .acknowledge(&delivery)
                .and_then(|()| session.commit())
            {
                Ok(()) => {
                    self.counters.handled.fetch_add(1, Ordering::SeqCst);
                    Outcome::Handled
                }
                Err(e) => {
                    warn!(
                        queue = %queue,
                        error = %e,
                        "unable to settle handled message, it will be redelivered"
                    );
                    self.discard_session(session);
                    self.counters.retried.fetch_add(1, Ordering::SeqCst);
                    Outcome::Retry
                }
            },
            Err(e) if e.is_connectivity() => {
                warn!(
                    queue = %queue,
                    destination = %destination,
                    error = %e,
                    "listener hit a connectivity error, leaving message for redelivery"
                );
                self.discard_session(session);
                self.counters.retried.fetch_add(1, Ordering::SeqCst);
                Outcome::Retry
            }
            Err(e) => {
                error!(
                    queue = %queue,
                    destination = %destination,
                    message_id = ?delivery.message.id,
                    error = %e,
                    "unable to process message, discarding"
                );
                if let Err(ack) = consumer.acknowledge(&delivery) {
                    warn!(queue = %queue, error = %ack, "unable to acknowledge discarded message");
                }
                if let Err(rb) = session.rollback() {
                    warn!(queue = %queue, error = %rb, "rollback after discard failed");
                }
                self.counters.discarded.fetch_add(1, Ordering::SeqCst);
                Outcome::Discarded
            }
        }
    }
}

/// One consumer on one queue, delivering to a handler on its own thread.
///
/// `connect` opens the session and starts delivery, `pause` closes only the
/// consumer, `resume` reopens the consumer on the still-open session, and
/// `close` tears everything down. None of them fail on a resource that is
/// already closed or paused.
pub struct MessageReceiver {
    inner: Arc<ReceiverInner>,
}

impl MessageReceiver {
    pub fn new(
        name: impl Into<String>,
        spec: ReceiverSpec,
        connection: Arc<IngressConnection>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(ReceiverInner {
                name: name.into(),
                spec,
                connection,
                handler,
                state: Mutex::new(ReceiverState::default()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn queue_name(&self) -> &str {
        &self.inner.spec.queue
    }

    pub fn kind(&self) -> ReceiverKind {
        self.inner.spec.kind
    }

    /// Open the session and start delivery. No-op if a session is already open.
    pub fn connect(&self) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        state.closed = false;

        let healthy = state.session.as_ref().is_some_and(|s| !s.is_closed());
        if !healthy {
            if let Some(consumer) = state.consumer.take() {
                consumer.close();
            }
            if let Some(session) = state.session.take() {
                session.close();
            }
            state.session = Some(self.inner.open_session()?);
            debug!(queue = %self.queue_name(), "receiver session opened");
        }

        if state.paused {
            return Ok(());
        }
        self.start(&mut state)
    }

    /// Create the consumer if needed and make sure a worker is running.
    fn start(&self, state: &mut ReceiverState) -> Result<(), BrokerError> {
        let needs_consumer = state.consumer.as_ref().map_or(true, |c| c.is_closed());
        if needs_consumer {
            let Some(session) = state.session.clone() else {
                return Err(BrokerError::Closed("receiver has no session".into()));
            };
            state.consumer = Some(self.inner.open_consumer(&session)?);
        }
        if state.worker.is_none() {
            state.worker = Some(DeliveryThread::spawn(Arc::clone(&self.inner)));
            info!(receiver = %self.name(), queue = %self.queue_name(), "receiver started");
        }
        Ok(())
    }

    /// Stop delivery and close the consumer; the session stays open.
    /// Waits for the delivery thread to exit.
    pub fn pause(&self) {
        self.pause_with(DeliveryThread::stop);
    }

    /// Like [`pause`](Self::pause), but only signals the delivery thread.
    ///
    /// A message already being handled completes on its own; one left
    /// unsettled is redelivered on resume.
    pub fn request_pause(&self) {
        self.pause_with(DeliveryThread::signal);
    }

    fn pause_with(&self, halt: fn(DeliveryThread)) {
        let (worker, consumer) = {
            let mut state = self.inner.lock();
            if state.closed || state.paused {
                return;
            }
            state.paused = true;
            (state.worker.take(), state.consumer.take())
        };
        if let Some(worker) = worker {
            halt(worker);
        }
        if let Some(consumer) = consumer {
            consumer.close();
        }
        info!(queue = %self.queue_name(), "receiver paused");
    }

    /// Restart delivery on the open session.
    ///
    /// Returns false and changes nothing if the session is down; `connect`
    /// must restore it first.
    pub fn resume(&self) -> bool {
        let mut state = self.inner.lock();
        if state.closed {
            return false;
        }
        if !state.paused && state.worker.is_some() {
            return true;
        }
        if !state.session.as_ref().is_some_and(|s| !s.is_closed()) {
            warn!(queue = %self.queue_name(), "session is down, cannot resume receiver yet");
            return false;
        }

        state.paused = false;
        match self.start(&mut state) {
            Ok(()) => {
                info!(queue = %self.queue_name(), "receiver resumed");
                true
            }
            Err(e) => {
                state.paused = true;
                warn!(queue = %self.queue_name(), error = %e, "unable to resume receiver");
                false
            }
        }
    }

    /// Stop delivery and close the consumer and session.
    pub fn close(&self) {
        let (worker, consumer, session) = {
            let mut state = self.inner.lock();
            state.closed = true;
            (state.worker.take(), state.consumer.take(), state.session.take())
        };
        if let Some(worker) = worker {
            worker.stop();
        }
        if let Some(consumer) = consumer {
            consumer.close();
        }
        if let Some(session) = session {
            session.close();
            debug!(queue = %self.queue_name(), "receiver closed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Whether a delivery thread is running.
    pub fn is_running(&self) -> bool {
        self.inner.lock().worker.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn stats(&self) -> ReceiverStats {
        let counters = &self.inner.counters;
        ReceiverStats {
            messages_handled: counters.handled.load(Ordering::SeqCst),
            messages_discarded: counters.discarded.load(Ordering::SeqCst),
            messages_retried: counters.retried.load(Ordering::SeqCst),
        }
    }

    /// Depth of this receiver's queue.
    ///
    /// A closed receiver never reconnects for this; its queue is reported
    /// unavailable.
    pub fn queue_status(&self) -> Result<QueueStatus, BrokerError> {
        let session = {
            let state = self.inner.lock();
            if state.closed {
                return Err(BrokerError::Closed(format!(
                    "receiver on {} is closed",
                    self.queue_name()
                )));
            }
            state.session.clone().filter(|s| !s.is_closed())
        };
        match session {
            Some(session) => session.queue_status(self.queue_name()),
            None => {
                let session = self.inner.open_session()?;
                let status = session.queue_status(self.queue_name());
                session.close();
                status
            }
        }
    }
}

impl Drop for MessageReceiver {
    fn drop(&mut self) {
        self.close();
    }
}
