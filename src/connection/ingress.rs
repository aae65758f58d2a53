use std::sync::Arc;

use tracing::info;

use crate::bus::{BrokerDirectory, Session};
use crate::config::EventConfig;
use crate::error::{BrokerError, ConfigError};
use crate::secondary::{ConnectionState, StatusListener};

use super::{backend_for, BrokerConnection, ConnectionHandle, Locator, ReconnectPolicy, EVENT_EXCHANGE};

/// Connection used by message receivers.
///
/// Registered with the secondary broker monitor: when the secondary broker
/// goes down, every session this connection handed out is closed, and
/// receivers reconnect on their next use.
pub struct IngressConnection {
    handle: ConnectionHandle,
}

impl IngressConnection {
    pub fn new(hooks: Box<dyn BrokerConnection>) -> Self {
        Self {
            handle: ConnectionHandle::new("ingress", hooks),
        }
    }

    /// Connection to the primary broker named in `config`.
    pub fn from_config(config: &EventConfig, directory: &BrokerDirectory) -> Result<Self, ConfigError> {
        let locator = Locator::new(&config.broker_url, EVENT_EXCHANGE)
            .reconnect(ReconnectPolicy::Limited(1))
            .retry_interval(config.receiver_retry_interval)
            .large_message_size(config.large_message_size)
            .declare_exchange(true);
        Ok(Self::new(backend_for(locator, directory)?))
    }

    pub fn create_session(&self) -> Result<Arc<dyn Session>, BrokerError> {
        self.handle.create_session()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

impl StatusListener for IngressConnection {
    fn on_status_update(&self, old: ConnectionState, new: ConnectionState) {
        if new == ConnectionState::Down && old != ConnectionState::Down {
            info!("secondary broker down, closing stale ingress sessions");
            self.close();
        }
    }
}
