use std::sync::{Arc, Mutex};

use tracing::info;

use crate::error::ListenerError;
use crate::event::EventRecord;
use crate::receiver::EventListener;

pub const LOGGING_LISTENER: &str = "audit_bus.LoggingListener";

/// Writes one audit line per event to the `audit` tracing target.
///
/// With a buffer attached, lines are also captured for inspection.
#[derive(Default)]
pub struct LoggingListener {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LoggingListener {
    pub fn new() -> Self {
        Self { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }
}

fn audit_line(event: &EventRecord) -> String {
    format!(
        "{} {} {} principal={}:{} owner={} entity={}",
        event.timestamp.to_rfc3339(),
        event.event_type,
        event.target,
        event.principal.principal_type,
        event.principal.name,
        event.owner_id.as_deref().unwrap_or("-"),
        event.entity_id.as_deref().unwrap_or("-"),
    )
}

impl EventListener for LoggingListener {
    fn name(&self) -> &str {
        LOGGING_LISTENER
    }

    fn on_event(&self, event: &EventRecord) -> Result<(), ListenerError> {
        info!(
            target: "audit",
            event_type = %event.event_type,
            target_type = %event.target,
            principal = %event.principal.name,
            owner = event.owner_id.as_deref().unwrap_or("-"),
            entity = event.entity_id.as_deref().unwrap_or("-"),
            "event"
        );
        if let Some(buffer) = &self.buffer {
            buffer
                .lock()
                .map_err(|_| ListenerError::Failed("audit log buffer poisoned".into()))?
                .push(audit_line(event));
        }
        Ok(())
    }
}
