//! Broker connection lifecycle.
//!
//! A backend implements [`BrokerConnection`], the three lifecycle hooks. A
//! [`ConnectionHandle`] drives those hooks: it resolves the locator once,
//! builds the session factory lazily under a mutex, and rebuilds it when it
//! reports itself closed. [`IngressConnection`] and [`EgressConnection`] are
//! the two roles the rest of the crate uses.

mod backend;
mod egress;
mod ingress;

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, info};

use crate::bus::{Session, SessionFactory};
use crate::error::BrokerError;

pub use backend::{backend_for, InMemoryConnection};
pub use egress::EgressConnection;
pub use ingress::IngressConnection;

/// Exchange events are published through on the primary broker.
pub const EVENT_EXCHANGE: &str = "event";

/// How hard a session factory tries to (re)establish its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Try this many times, then give up and report the factory closed.
    Limited(u32),
    /// Never give up; the factory survives broker outages.
    Unlimited,
}

/// Resolved address and transport settings of one broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub url: String,
    pub exchange: String,
    pub reconnect: ReconnectPolicy,
    pub retry_interval: Duration,
    pub large_message_size: usize,
    /// Create the exchange when connecting instead of expecting it to exist.
    pub declare_exchange: bool,
}

impl Locator {
    pub fn new(url: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange: exchange.into(),
            reconnect: ReconnectPolicy::Limited(1),
            retry_interval: Duration::from_secs(1),
            large_message_size: 100 * 1024,
            declare_exchange: false,
        }
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn large_message_size(mut self, size: usize) -> Self {
        self.large_message_size = size;
        self
    }

    pub fn declare_exchange(mut self, declare: bool) -> Self {
        self.declare_exchange = declare;
        self
    }
}

/// Lifecycle hooks of a broker backend.
pub trait BrokerConnection: Send + Sync {
    /// Resolve the broker address. Called once per handle.
    fn init_locator(&self) -> Locator;

    /// Connect and build a session factory. Called again whenever the
    /// previous factory has closed.
    fn init_session_factory(&self, locator: &Locator)
        -> Result<Arc<dyn SessionFactory>, BrokerError>;

    fn create_session(&self, factory: &dyn SessionFactory) -> Result<Arc<dyn Session>, BrokerError> {
        factory.create_session()
    }
}

/// Owns one lazily built session factory.
///
/// The first caller builds the factory while holding `init`; concurrent
/// first callers block on it instead of connecting twice. Afterwards the
/// read lock on `factory` is the only synchronization on the fast path.
pub struct ConnectionHandle {
    name: &'static str,
    hooks: Box<dyn BrokerConnection>,
    locator: Mutex<Option<Locator>>,
    factory: RwLock<Option<Arc<dyn SessionFactory>>>,
    init: Mutex<()>,
}

impl ConnectionHandle {
    pub fn new(name: &'static str, hooks: Box<dyn BrokerConnection>) -> Self {
        Self {
            name,
            hooks,
            locator: Mutex::new(None),
            factory: RwLock::new(None),
            init: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The open session factory, building or rebuilding it if needed.
    pub fn factory(&self) -> Result<Arc<dyn SessionFactory>, BrokerError> {
        if let Some(factory) = self.cached()? {
            return Ok(factory);
        }

        let _init = self.init.lock().map_err(|e| poisoned(self.name, e))?;
        if let Some(factory) = self.cached()? {
            return Ok(factory);
        }

        let locator = {
            let mut slot = self.locator.lock().map_err(|e| poisoned(self.name, e))?;
            slot.get_or_insert_with(|| self.hooks.init_locator()).clone()
        };

        let stale = self
            .factory
            .write()
            .map_err(|e| poisoned(self.name, e))?
            .take();
        if let Some(stale) = stale {
            debug!(connection = self.name, "discarding closed session factory");
            stale.close();
        }

        let factory = self.hooks.init_session_factory(&locator)?;
        *self.factory.write().map_err(|e| poisoned(self.name, e))? = Some(Arc::clone(&factory));
        info!(connection = self.name, url = %locator.url, "session factory created");
        Ok(factory)
    }

    fn cached(&self) -> Result<Option<Arc<dyn SessionFactory>>, BrokerError> {
        let guard = self.factory.read().map_err(|e| poisoned(self.name, e))?;
        Ok(guard.as_ref().filter(|f| !f.is_closed()).cloned())
    }

    pub fn create_session(&self) -> Result<Arc<dyn Session>, BrokerError> {
        let factory = self.factory()?;
        self.hooks.create_session(factory.as_ref())
    }

    /// True if never connected, or the factory reports itself closed.
    /// A failure while checking counts as closed.
    pub fn is_closed(&self) -> bool {
        match self.factory.read() {
            Ok(guard) => guard.as_ref().map_or(true, |f| f.is_closed()),
            Err(_) => true,
        }
    }

    /// Close the factory. Safe to call any number of times.
    pub fn close(&self) {
        let factory = match self.factory.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match factory {
            Some(factory) => {
                factory.close();
                info!(connection = self.name, "connection closed");
            }
            None => debug!(connection = self.name, "connection already closed"),
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn poisoned<E: std::fmt::Display>(name: &str, err: E) -> BrokerError {
    BrokerError::Rejected(format!("{} connection lock poisoned: {}", name, err))
}
