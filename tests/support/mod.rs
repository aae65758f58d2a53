//! Shared helpers for the integration suites.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use audit_bus::bus::{BrokerDirectory, InMemoryBroker};
use audit_bus::{
    EventConfig, EventListener, EventRecord, EventType, ListenerError, ListenerRegistry, Target,
};

/// Route test logs through the test writer. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `predicate` until it holds or `timeout` elapses. Returns its last value.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Config tuned for tests: fast polling, the `recorder` listener only.
pub fn test_config() -> EventConfig {
    EventConfig {
        listeners: vec!["recorder".to_string()],
        receiver_poll_interval: Duration::from_millis(10),
        receiver_retry_interval: Duration::from_millis(20),
        ..EventConfig::default()
    }
}

/// A directory holding the primary broker `vm://0`.
pub fn primary() -> (BrokerDirectory, InMemoryBroker) {
    let directory = BrokerDirectory::new();
    let broker = directory.register("0");
    (directory, broker)
}

pub fn event(event_type: EventType, target: Target, entity: &str) -> EventRecord {
    EventRecord::builder(event_type, target)
        .owner_id("admin")
        .entity_id(entity)
        .build()
}

/// What a [`Recorder`] does with the next events it sees.
#[derive(Debug, Clone)]
pub enum Script {
    Fail,
    Disconnect,
}

/// Listener that keeps every event it accepted, optionally failing on cue.
pub struct Recorder {
    name: String,
    events: Mutex<Vec<EventRecord>>,
    script: Mutex<Vec<Script>>,
    attempts: Mutex<usize>,
}

impl Recorder {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            events: Mutex::new(Vec::new()),
            script: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        })
    }

    /// Fail the next deliveries in order, one script step each.
    pub fn then(&self, step: Script) {
        self.script.lock().unwrap().push(step);
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().unwrap().clone()
    }

    pub fn entities(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.entity_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl EventListener for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &EventRecord) -> Result<(), ListenerError> {
        *self.attempts.lock().unwrap() += 1;
        let step = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        match step {
            Some(Script::Fail) => Err(ListenerError::Failed("rejected by test".into())),
            Some(Script::Disconnect) => Err(ListenerError::Broker(
                audit_bus::BrokerError::Unavailable("test disconnect".into()),
            )),
            None => {
                self.events.lock().unwrap().push(event.clone());
                Ok(())
            }
        }
    }
}

/// Registry with `recorder` bound to the given listener.
pub fn registry_with(recorder: &Arc<Recorder>) -> ListenerRegistry {
    let mut registry = ListenerRegistry::with_defaults();
    let recorder = Arc::clone(recorder);
    registry.register("recorder", move || recorder.clone());
    registry
}
