//! Assembly of the event layer from configuration.
//!
//! ```text
//!   business code
//!        │ queue_event / send_events
//!        ▼
//!   EventSink ──egress──▶ primary broker ──ingress──▶ MessageReceiver ──▶ EventListener
//!                                                          ▲                    │
//!                                   ReceiverManager ───────┘        SecondaryBusPublisher
//!                                          ▲                                    │
//!   MonitorThread ─▶ SecondaryBrokerStatusMonitor ◀── management ── secondary broker
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::info;

use crate::bus::{broker_name, BrokerDirectory, QueueStatus};
use crate::config::EventConfig;
use crate::connection::{EgressConnection, IngressConnection};
use crate::error::StartError;
use crate::event::EventFilter;
use crate::listeners::ListenerRegistry;
use crate::receiver::{JobDispatcher, ReceiverManager};
use crate::secondary::{
    ConnectionState, ManagementClient, MonitorThread, SecondaryBrokerStatusMonitor,
    SecondaryBusPublisher,
};
use crate::sink::{DirectPublisher, EventSink, NoopEventSink, TransactionalEventSink};

/// Health of the whole bus.
#[derive(Debug, Clone, Serialize)]
pub struct BusStatus {
    /// Secondary broker state, absent when the secondary bus is disabled.
    pub secondary: Option<ConnectionState>,
    pub queues: BTreeMap<String, QueueStatus>,
    pub ok: bool,
}

/// Configures and starts an [`EventBus`].
pub struct EventBusBuilder {
    config: EventConfig,
    directory: BrokerDirectory,
    registry: ListenerRegistry,
    job_dispatcher: Option<Arc<dyn JobDispatcher>>,
}

impl EventBusBuilder {
    /// Brokers that `vm://` URLs resolve against.
    pub fn directory(mut self, directory: BrokerDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn registry(mut self, registry: ListenerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Handles jobs listed in `jobs.enabled`. Without one no job receivers start.
    pub fn job_dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        self.job_dispatcher = Some(dispatcher);
        self
    }

    /// Build every component and connect the receivers.
    ///
    /// The primary broker is created in the directory if it does not exist
    /// yet. The secondary broker must already be registered.
    pub fn start(self) -> Result<EventBus, StartError> {
        let EventBusBuilder {
            config,
            directory,
            registry,
            job_dispatcher,
        } = self;

        let filter = EventFilter::from_config(&config.filter)?;
        let listeners = registry.build(&config.listeners)?;
        directory.register(broker_name(&config.broker_url)?);

        let egress = Arc::new(EgressConnection::primary(&config, &directory)?);
        let sink: Arc<dyn EventSink> = if config.enabled {
            Arc::new(TransactionalEventSink::new(Arc::clone(&egress), filter.clone()))
        } else {
            info!("event publication disabled, using no-op sink");
            Arc::new(NoopEventSink)
        };
        let direct = DirectPublisher::new(Arc::clone(&egress), filter);

        let ingress = Arc::new(IngressConnection::from_config(&config, &directory)?);
        let mut manager = ReceiverManager::new(
            Arc::clone(&ingress),
            config.receiver_poll_interval,
            config.receiver_retry_interval,
        );

        let secondary = if config.secondary.enabled {
            let broker = directory.resolve(&config.secondary.broker_url)?;
            let client: Arc<dyn ManagementClient> =
                Arc::new(broker.management_client(config.secondary.receive_timeout));
            let egress = Arc::new(EgressConnection::secondary(&config, &directory)?);
            let publisher = Arc::new(SecondaryBusPublisher::new(
                egress,
                &config.secondary.exchange,
                config.secondary.retry_attempts,
                config.secondary.retry_interval,
            ));
            manager = manager.with_secondary(Arc::clone(&client), &config.secondary.exchange);
            manager.add_listener(publisher.clone());
            let monitor = Arc::new(SecondaryBrokerStatusMonitor::new(
                client,
                &config.secondary.exchange,
            ));
            Some((monitor, publisher))
        } else {
            None
        };

        for listener in listeners {
            manager.add_listener(listener);
        }
        if let Some(dispatcher) = job_dispatcher {
            manager.add_job_workers(dispatcher, &config.jobs.enabled, config.jobs.worker_threads);
        }

        let manager = Arc::new(manager);
        let secondary = secondary.map(|(monitor, publisher)| {
            monitor.register(ingress.clone());
            monitor.register(publisher.clone());
            monitor.register(manager.clone());
            Secondary {
                monitor,
                publisher,
                poller: Mutex::new(None),
            }
        });

        manager.connect_all()?;

        if let Some(secondary) = &secondary {
            let poller = MonitorThread::spawn(
                Arc::clone(&secondary.monitor),
                config.monitor_interval,
            );
            *secondary.poller.lock().unwrap_or_else(PoisonError::into_inner) = Some(poller);
        }

        info!(
            broker = %config.broker_url,
            receivers = manager.receivers().len(),
            secondary = config.secondary.enabled,
            "event bus started"
        );

        Ok(EventBus {
            config,
            sink,
            direct,
            egress,
            ingress,
            manager,
            secondary,
        })
    }
}

struct Secondary {
    monitor: Arc<SecondaryBrokerStatusMonitor>,
    publisher: Arc<SecondaryBusPublisher>,
    poller: Mutex<Option<MonitorThread>>,
}

/// The running event layer.
///
/// ## Example
///
/// ```ignore
/// let bus = EventBus::builder(EventConfig::from_env()?).start()?;
///
/// let mut uow = UnitOfWork::new();
/// bus.sink().queue_event(&mut uow, event);
/// // ... business transaction commits ...
/// bus.sink().send_events(&mut uow);
///
/// bus.shutdown();
/// ```
pub struct EventBus {
    config: EventConfig,
    sink: Arc<dyn EventSink>,
    direct: DirectPublisher,
    egress: Arc<EgressConnection>,
    ingress: Arc<IngressConnection>,
    manager: Arc<ReceiverManager>,
    secondary: Option<Secondary>,
}

impl EventBus {
    pub fn builder(config: EventConfig) -> EventBusBuilder {
        EventBusBuilder {
            config,
            directory: BrokerDirectory::new(),
            registry: ListenerRegistry::with_defaults(),
            job_dispatcher: None,
        }
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }

    pub fn direct_publisher(&self) -> &DirectPublisher {
        &self.direct
    }

    pub fn manager(&self) -> &ReceiverManager {
        &self.manager
    }

    pub fn monitor(&self) -> Option<&Arc<SecondaryBrokerStatusMonitor>> {
        self.secondary.as_ref().map(|s| &s.monitor)
    }

    pub fn secondary_publisher(&self) -> Option<&Arc<SecondaryBusPublisher>> {
        self.secondary.as_ref().map(|s| &s.publisher)
    }

    /// Queue health plus the secondary broker's state. Not ok while the
    /// secondary broker is enabled and not connected.
    pub fn status(&self) -> BusStatus {
        let secondary = self.monitor().map(|m| m.state());
        let ok = match secondary {
            None => true,
            Some(state) => state == ConnectionState::Connected,
        };
        BusStatus {
            secondary,
            queues: self.manager.queue_health(),
            ok,
        }
    }

    /// Stop polling, close every receiver and connection. Safe to call
    /// more than once.
    pub fn shutdown(&self) {
        if let Some(secondary) = &self.secondary {
            let poller = secondary
                .poller
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(poller) = poller {
                let stats = poller.stop();
                info!(polls = stats.polls, transitions = stats.transitions, "monitor stopped");
            }
        }

        self.manager.close_all();

        if let Some(secondary) = &self.secondary {
            secondary.publisher.close_all();
        }
        self.ingress.close();
        self.egress.close();
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
