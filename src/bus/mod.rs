//! Message bus - broker client abstractions
//!
//! Traits every broker backend implements, plus the in-memory backend used
//! for single-process deployments and tests.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SessionFactory (per connection)              │
//! │  - create_session() / is_closed() / close()                 │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Session (transacted)                       │
//! │  send(msg) / commit() / rollback() / create_consumer(queue) │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Consumer                              │
//! │  receive(timeout) / acknowledge(delivery) / close()         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod broker;
mod directory;
mod in_memory;
mod message;
mod selector;

pub use broker::{Consumer, Session, SessionFactory};
pub use directory::{broker_name, BrokerDirectory, VM_SCHEME};
pub use in_memory::{topic_matches, InMemoryBroker, InMemoryManagement, InMemorySessionFactory};
pub use message::{properties, Delivery, Message, QueueStatus};
pub use selector::Selector;
