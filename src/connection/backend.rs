use std::sync::Arc;
use std::thread;

use tracing::warn;

use crate::bus::{BrokerDirectory, InMemoryBroker, InMemorySessionFactory, SessionFactory, VM_SCHEME};
use crate::error::{BrokerError, ConfigError};

use super::{BrokerConnection, Locator, ReconnectPolicy};

/// Pick the backend for a locator's URL scheme.
pub fn backend_for(
    locator: Locator,
    directory: &BrokerDirectory,
) -> Result<Box<dyn BrokerConnection>, ConfigError> {
    if locator.url.starts_with(VM_SCHEME) {
        let broker = directory.resolve(&locator.url)?;
        Ok(Box::new(InMemoryConnection::new(broker, locator)))
    } else {
        Err(ConfigError::UnsupportedBroker(locator.url))
    }
}

/// Connection hooks for a `vm://` broker.
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    locator: Locator,
}

impl InMemoryConnection {
    pub fn new(broker: InMemoryBroker, locator: Locator) -> Self {
        Self { broker, locator }
    }
}

impl BrokerConnection for InMemoryConnection {
    fn init_locator(&self) -> Locator {
        self.locator.clone()
    }

    fn init_session_factory(
        &self,
        locator: &Locator,
    ) -> Result<Arc<dyn SessionFactory>, BrokerError> {
        let (attempts, reattach) = match locator.reconnect {
            ReconnectPolicy::Limited(n) => (n.max(1), false),
            ReconnectPolicy::Unlimited => (1, true),
        };

        let mut attempt = 1;
        loop {
            match InMemorySessionFactory::connect(
                self.broker.clone(),
                locator.exchange.clone(),
                locator.large_message_size,
                reattach,
            ) {
                Ok(factory) => {
                    if locator.declare_exchange {
                        self.broker.declare_exchange(&locator.exchange);
                    }
                    return Ok(Arc::new(factory));
                }
                Err(e) if e.is_connectivity() && attempt < attempts => {
                    warn!(
                        url = %locator.url,
                        attempt,
                        error = %e,
                        "connect failed, retrying"
                    );
                    attempt += 1;
                    thread::sleep(locator.retry_interval);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
