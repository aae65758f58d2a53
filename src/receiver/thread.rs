//! Background delivery loop of a message receiver.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::message_receiver::{Outcome, ReceiverInner};

/// Polls one receiver's consumer until told to stop.
///
/// Follows the spawn / stop-and-join shape of the other worker threads:
/// a stop channel checked between receives, and `stop` blocking until the
/// loop has exited. The loop also reconnects a dead session, waiting the
/// receiver's retry interval between failed attempts.
pub(crate) struct DeliveryThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl DeliveryThread {
    pub(crate) fn spawn(inner: Arc<ReceiverInner>) -> Self {
        let (stop_tx, stop_rx) = channel();
        let handle = thread::spawn(move || run(inner, stop_rx));
        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the loop to stop and wait for it to finish.
    pub(crate) fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("delivery thread panicked");
            }
        }
    }

    /// Signal the loop to stop without waiting. The thread finishes the
    /// message it is handling, if any, and exits on its own.
    pub(crate) fn signal(mut self) {
        let _ = self.stop_tx.send(());
        self.handle.take();
    }
}

impl Drop for DeliveryThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

fn run(inner: Arc<ReceiverInner>, stop_rx: Receiver<()>) {
    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let Some((session, consumer)) = inner.current() else {
            match inner.reopen() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    warn!(queue = %inner.queue(), error = %e, "unable to reconnect receiver");
                    if wait(&stop_rx, inner.retry_interval()) {
                        break;
                    }
                    continue;
                }
            }
        };

        match consumer.receive(inner.poll_interval()) {
            Ok(Some(delivery)) => {
                if let Outcome::Retry = inner.dispatch(&session, &consumer, delivery) {
                    if wait(&stop_rx, inner.retry_interval()) {
                        break;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                // A pause closes the consumer under us; the session stays.
                if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                debug!(queue = %inner.queue(), error = %e, "consumer unavailable");
                inner.discard_session(&session);
            }
        }
    }
    debug!(queue = %inner.queue(), "delivery thread stopped");
}

/// Sleep up to `timeout`, returning true if a stop was requested meanwhile.
fn wait(stop_rx: &Receiver<()>, timeout: Duration) -> bool {
    match stop_rx.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}
