//! Async job dispatch over the bus.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::{properties, Message, Selector};
use crate::error::{BrokerError, ListenerError};

use super::listener::MessageHandler;

/// Destination and queue of job messages.
pub const JOBS_DESTINATION: &str = "jobs";

/// A job request as carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job_key: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl JobMessage {
    pub fn new(job_key: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            job_key: job_key.into(),
            arguments,
        }
    }

    pub fn to_message(&self) -> Result<Message, BrokerError> {
        Ok(Message::json(JOBS_DESTINATION, self)?.with_property(properties::JOB_KEY, &self.job_key))
    }

    pub fn from_message(message: &Message) -> Result<Self, ListenerError> {
        Ok(serde_json::from_slice(&message.payload)?)
    }
}

/// Runs jobs taken off the bus.
pub trait JobDispatcher: Send + Sync {
    fn dispatch(&self, job: JobMessage) -> Result<(), ListenerError>;
}

/// Selector restricting job receivers to the enabled job keys:
/// `JOB_KEY IN ('k1','k2')`.
pub fn job_selector<I, S>(keys: I) -> Selector
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Selector::in_list(properties::JOB_KEY, keys)
}

/// Adapts a [`JobDispatcher`] to the receiver's message handler.
pub struct JobDispatch {
    dispatcher: Arc<dyn JobDispatcher>,
}

impl JobDispatch {
    pub fn new(dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl MessageHandler for JobDispatch {
    fn handle(&self, message: &Message) -> Result<(), ListenerError> {
        self.dispatcher.dispatch(JobMessage::from_message(message)?)
    }
}
