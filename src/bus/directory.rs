//! Name-to-broker lookup for `vm://` URLs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ConfigError;

use super::in_memory::InMemoryBroker;

/// URL scheme of in-memory brokers.
pub const VM_SCHEME: &str = "vm://";

/// The set of in-memory brokers known to one process.
///
/// Passed explicitly to whatever builds connections, so tests can run
/// side by side with isolated brokers.
#[derive(Clone, Debug, Default)]
pub struct BrokerDirectory {
    brokers: Arc<Mutex<HashMap<String, InMemoryBroker>>>,
}

impl BrokerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the broker with this name, creating it on first use.
    pub fn register(&self, name: &str) -> InMemoryBroker {
        self.brokers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| InMemoryBroker::new(name))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<InMemoryBroker> {
        self.brokers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Resolve a `vm://<name>` URL to a registered broker.
    pub fn resolve(&self, url: &str) -> Result<InMemoryBroker, ConfigError> {
        let name = broker_name(url)?;
        self.get(name)
            .ok_or_else(|| ConfigError::UnknownBroker(url.to_string()))
    }
}

/// The broker name in a `vm://<name>` URL.
pub fn broker_name(url: &str) -> Result<&str, ConfigError> {
    match url.trim().strip_prefix(VM_SCHEME) {
        Some(name) if !name.is_empty() => Ok(name.trim_end_matches('/')),
        _ => Err(ConfigError::UnsupportedBroker(url.to_string())),
    }
}
