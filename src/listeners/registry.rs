use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::ConfigError;
use crate::receiver::EventListener;

use super::{AuditStoreListener, EventStore, InMemoryEventStore, LoggingListener};

type Constructor = Box<dyn Fn() -> Arc<dyn EventListener> + Send + Sync>;

/// Maps configured listener ids to constructors.
pub struct ListenerRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl ListenerRegistry {
    /// A registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// `logging` and `audit-store`, the latter writing to a fresh in-memory store.
    pub fn with_defaults() -> Self {
        Self::with_store(Arc::new(InMemoryEventStore::new()))
    }

    /// `logging` and `audit-store`, the latter writing to `store`.
    pub fn with_store(store: Arc<dyn EventStore>) -> Self {
        let mut registry = Self::empty();
        registry.register("logging", || Arc::new(LoggingListener::new()));
        registry.register("audit-store", move || {
            Arc::new(AuditStoreListener::new(Arc::clone(&store)))
        });
        registry
    }

    /// Register or replace the constructor for `id`.
    pub fn register<F>(&mut self, id: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn EventListener> + Send + Sync + 'static,
    {
        self.constructors.insert(id.into(), Box::new(constructor));
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Build one listener per id, in order. Fails on the first unknown id.
    pub fn build<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Arc<dyn EventListener>>, ConfigError> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                let constructor = self
                    .constructors
                    .get(id)
                    .ok_or_else(|| ConfigError::UnknownListener(id.to_string()))?;
                let listener = constructor();
                debug!(id, listener = listener.name(), "listener built");
                Ok(listener)
            })
            .collect()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
