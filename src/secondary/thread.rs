//! Background polling of the secondary broker monitor.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use super::{ConnectionState, SecondaryBrokerStatusMonitor};

/// Statistics from the monitor thread.
#[derive(Debug, Default, Clone)]
pub struct MonitorStats {
    pub polls: usize,
    pub transitions: usize,
    pub down_polls: usize,
}

/// A background thread polling a [`SecondaryBrokerStatusMonitor`].
///
/// ## Example
///
/// ```ignore
/// let monitor = Arc::new(SecondaryBrokerStatusMonitor::new(client, "event"));
/// let poller = MonitorThread::spawn(monitor.clone(), Duration::from_secs(5));
///
/// // ... run ...
///
/// let stats = poller.stop();
/// println!("{} transitions over {} polls", stats.transitions, stats.polls);
/// ```
pub struct MonitorThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<MonitorStats>>,
}

impl MonitorThread {
    /// Poll immediately, then every `interval` until stopped.
    pub fn spawn(monitor: Arc<SecondaryBrokerStatusMonitor>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = MonitorStats::default();

            loop {
                let before = monitor.state();
                let after = monitor.poll();
                stats.polls += 1;
                if after != before {
                    stats.transitions += 1;
                }
                if after == ConnectionState::Down {
                    stats.down_polls += 1;
                }

                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            debug!(polls = stats.polls, "monitor thread stopped");
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the thread to stop and wait for it to finish.
    /// Returns the polling statistics.
    pub fn stop(mut self) -> MonitorStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            MonitorStats::default()
        }
    }
}

impl Drop for MonitorThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
