//! Event records, routing and filtering.

mod filter;
mod record;
pub mod routing;

pub use filter::{EventFilter, FilterPolicy, FilterRule};
pub use record::{EventRecord, EventRecordBuilder, EventType, PrincipalSnapshot, ReferenceType, Target};
pub use routing::{destination, listener_queue_name, RouteTable};
