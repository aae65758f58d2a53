//! Destination and queue naming.

use std::collections::HashMap;

use super::record::{EventType, Target};

/// Prefix of every listener queue name.
pub const LISTENER_QUEUE_PREFIX: &str = "event.";

/// Destination for an event pair: `lowercase(target) + "." + lowercase(type)`.
pub fn destination(event_type: EventType, target: Target) -> String {
    format!(
        "{}.{}",
        target.as_str().to_ascii_lowercase(),
        event_type.as_str().to_ascii_lowercase()
    )
}

/// Queue a listener consumes from, derived from its identity.
pub fn listener_queue_name(listener_identity: &str) -> String {
    format!("{}{}", LISTENER_QUEUE_PREFIX, listener_identity)
}

/// Flat lookup of every `(type, target)` pair to its destination, computed once.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<(EventType, Target), String>,
}

impl RouteTable {
    pub fn new() -> Self {
        let mut routes = HashMap::with_capacity(EventType::ALL.len() * Target::ALL.len());
        for event_type in EventType::ALL {
            for target in Target::ALL {
                routes.insert((event_type, target), destination(event_type, target));
            }
        }
        Self { routes }
    }

    pub fn get(&self, event_type: EventType, target: Target) -> &str {
        // Every pair is inserted in `new`.
        self.routes
            .get(&(event_type, target))
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// All destinations, sorted.
    pub fn destinations(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.routes.values().map(String::as_str).collect();
        all.sort_unstable();
        all
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
