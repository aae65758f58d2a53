//! Secondary broker health and the secondary routing path.

mod management;
mod monitor;
mod publisher;
mod thread;

use std::fmt;

use serde::Serialize;

pub use management::ManagementClient;
pub use monitor::SecondaryBrokerStatusMonitor;
pub use publisher::SecondaryBusPublisher;
pub use thread::{MonitorStats, MonitorThread};

/// Health of the secondary broker, recomputed on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Unknown,
    Connected,
    FlowStopped,
    MissingExchange,
    MissingBinding,
    Down,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unknown => "UNKNOWN",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::FlowStopped => "FLOW_STOPPED",
            ConnectionState::MissingExchange => "MISSING_EXCHANGE",
            ConnectionState::MissingBinding => "MISSING_BINDING",
            ConnectionState::Down => "DOWN",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notified synchronously, on the polling thread, of every state transition.
///
/// Implementations must return quickly.
pub trait StatusListener: Send + Sync {
    fn on_status_update(&self, old: ConnectionState, new: ConnectionState);
}
