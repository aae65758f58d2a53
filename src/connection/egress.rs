use std::sync::Arc;

use crate::bus::{BrokerDirectory, Session};
use crate::config::EventConfig;
use crate::error::{BrokerError, ConfigError};

use super::{backend_for, BrokerConnection, ConnectionHandle, Locator, ReconnectPolicy, EVENT_EXCHANGE};

/// Connection used for publishing.
///
/// Always reconnects without limit: publishing never gives up on a broker
/// for good, it only fails the attempt at hand.
pub struct EgressConnection {
    handle: ConnectionHandle,
}

impl EgressConnection {
    pub fn new(hooks: Box<dyn BrokerConnection>) -> Self {
        Self {
            handle: ConnectionHandle::new("egress", hooks),
        }
    }

    /// Publishing connection to the primary broker.
    pub fn primary(config: &EventConfig, directory: &BrokerDirectory) -> Result<Self, ConfigError> {
        let locator = Locator::new(&config.broker_url, EVENT_EXCHANGE)
            .reconnect(ReconnectPolicy::Unlimited)
            .retry_interval(config.receiver_retry_interval)
            .large_message_size(config.large_message_size)
            .declare_exchange(true);
        Ok(Self::new(backend_for(locator, directory)?))
    }

    /// Publishing connection to the secondary broker. Its exchange is
    /// managed by the broker's operators and never declared here.
    pub fn secondary(config: &EventConfig, directory: &BrokerDirectory) -> Result<Self, ConfigError> {
        let secondary = &config.secondary;
        let locator = Locator::new(&secondary.broker_url, &secondary.exchange)
            .reconnect(ReconnectPolicy::Unlimited)
            .retry_interval(secondary.retry_interval)
            .large_message_size(config.large_message_size)
            .declare_exchange(false);
        let hooks = backend_for(locator, directory)?;
        Ok(Self {
            handle: ConnectionHandle::new("secondary-egress", hooks),
        })
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
