pub mod bus;
pub mod config;
pub mod connection;
mod error;
pub mod event;
mod event_bus;
pub mod listeners;
pub mod receiver;
pub mod secondary;
pub mod sink;

#[cfg(feature = "http")]
pub mod http;

pub use config::EventConfig;
pub use connection::{EgressConnection, IngressConnection};
pub use error::{BrokerError, ConfigError, ListenerError, StartError};
pub use event::{EventFilter, EventRecord, EventType, PrincipalSnapshot, ReferenceType, Target};
pub use event_bus::{BusStatus, EventBus, EventBusBuilder};
pub use listeners::ListenerRegistry;
pub use receiver::{EventListener, JobDispatcher, JobMessage, ReceiverManager};
pub use secondary::{ConnectionState, SecondaryBrokerStatusMonitor, StatusListener};
pub use sink::{DirectPublisher, EventSink, UnitOfWork};
