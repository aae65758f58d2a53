//! Message receivers: one consumer per listener or job worker.
//!
//! ## Delivery policy
//!
//! | handler result              | message                         | session  |
//! |-----------------------------|---------------------------------|----------|
//! | `Ok`                        | acknowledged                    | commit   |
//! | connectivity-class error    | left unacknowledged, redelivered| dropped  |
//! | any other error             | acknowledged and discarded      | rollback |

mod job;
mod listener;
mod manager;
mod message_receiver;
mod thread;

pub use job::{job_selector, JobDispatch, JobDispatcher, JobMessage, JOBS_DESTINATION};
pub use listener::{EventDispatch, EventListener, MessageHandler};
pub use manager::{ReceiverManager, EVENT_DESTINATIONS};
pub use message_receiver::{MessageReceiver, ReceiverKind, ReceiverSpec, ReceiverStats};
