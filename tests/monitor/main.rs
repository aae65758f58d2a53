//! Secondary broker monitoring integration tests.
//!
//! The bus forwards events to a secondary broker and follows its health:
//! - only state transitions are reported, once each
//! - while the secondary broker is down or flow stopped, its traffic waits
//!   on the primary broker and nothing is lost
//! - status reports never wait on a publish in progress
//! - the background poller finds changes on its own

#[path = "../support/mod.rs"]
mod support;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use audit_bus::bus::{BrokerDirectory, InMemoryBroker};
use audit_bus::secondary::MonitorThread;
use audit_bus::{
    ConnectionState, EventBus, EventConfig, EventType, SecondaryBrokerStatusMonitor,
    StatusListener, Target, UnitOfWork,
};

use support::{event, init_tracing, registry_with, test_config, wait_until, Recorder, WAIT};

const DOWNSTREAM: &str = "downstream.audit";

#[derive(Default)]
struct Transitions(Mutex<Vec<(ConnectionState, ConnectionState)>>);

impl StatusListener for Transitions {
    fn on_status_update(&self, old: ConnectionState, new: ConnectionState) {
        self.0.lock().unwrap().push((old, new));
    }
}

impl Transitions {
    fn seen(&self) -> Vec<(ConnectionState, ConnectionState)> {
        self.0.lock().unwrap().clone()
    }
}

fn secondary_config() -> EventConfig {
    let mut config = test_config();
    config.secondary.enabled = true;
    config.secondary.retry_interval = Duration::from_millis(20);
    config.secondary.receive_timeout = Duration::from_millis(50);
    // Tests drive polling by hand after the first background poll.
    config.monitor_interval = Duration::from_secs(3600);
    config
}

struct Setup {
    bus: EventBus,
    primary: InMemoryBroker,
    secondary: InMemoryBroker,
    recorder: Arc<Recorder>,
}

fn start() -> Setup {
    init_tracing();
    let directory = BrokerDirectory::new();
    let primary = directory.register("0");
    let secondary = directory.register("secondary");
    secondary.bind("event", "#", DOWNSTREAM);

    let recorder = Recorder::new("recorder");
    let bus = EventBus::builder(secondary_config())
        .directory(directory)
        .registry(registry_with(&recorder))
        .start()
        .unwrap();

    let monitor = bus.monitor().unwrap();
    assert!(wait_until(WAIT, || monitor.state() == ConnectionState::Connected));

    Setup {
        bus,
        primary,
        secondary,
        recorder,
    }
}

fn publish(bus: &EventBus, entity: &str) {
    let sink = bus.sink();
    let mut uow = UnitOfWork::new();
    sink.queue_event(&mut uow, event(EventType::Created, Target::Consumer, entity));
    sink.send_events(&mut uow);
}

fn secondary_queue() -> String {
    "event.audit_bus.SecondaryBusPublisher".to_string()
}

// ============================================================================
// Transitions
// ============================================================================

#[test]
fn each_transition_is_reported_once() {
    init_tracing();
    let broker = InMemoryBroker::new("secondary");
    broker.bind("event", "#", DOWNSTREAM);
    let monitor = SecondaryBrokerStatusMonitor::new(
        Arc::new(broker.management_client(Duration::from_millis(20))),
        "event",
    );
    let transitions = Arc::new(Transitions::default());
    monitor.register(transitions.clone());

    assert_eq!(monitor.poll(), ConnectionState::Connected);
    assert_eq!(monitor.poll(), ConnectionState::Connected);
    broker.set_available(false);
    assert_eq!(monitor.poll(), ConnectionState::Down);
    assert_eq!(monitor.poll(), ConnectionState::Down);
    broker.set_available(true);
    assert_eq!(monitor.poll(), ConnectionState::Connected);

    assert_eq!(
        transitions.seen(),
        [
            (ConnectionState::Connected, ConnectionState::Down),
            (ConnectionState::Down, ConnectionState::Connected),
        ]
    );
}

#[test]
fn every_unhealthy_state_is_reported() {
    init_tracing();
    let broker = InMemoryBroker::new("secondary");
    let monitor = SecondaryBrokerStatusMonitor::new(
        Arc::new(broker.management_client(Duration::from_millis(20))),
        "event",
    );
    let transitions = Arc::new(Transitions::default());
    monitor.register(transitions.clone());

    assert_eq!(monitor.poll(), ConnectionState::MissingExchange);
    broker.declare_exchange("event");
    assert_eq!(monitor.poll(), ConnectionState::MissingBinding);
    broker.bind("event", "#", DOWNSTREAM);
    broker.set_flow_stopped(DOWNSTREAM, true);
    assert_eq!(monitor.poll(), ConnectionState::FlowStopped);
    assert_eq!(monitor.flow_stopped_queue().as_deref(), Some(DOWNSTREAM));
    broker.set_flow_stopped(DOWNSTREAM, false);
    assert_eq!(monitor.poll(), ConnectionState::Connected);

    let states: Vec<ConnectionState> = transitions.seen().into_iter().map(|(_, new)| new).collect();
    assert_eq!(
        states,
        [
            ConnectionState::MissingExchange,
            ConnectionState::MissingBinding,
            ConnectionState::FlowStopped,
            ConnectionState::Connected,
        ]
    );
}

// ============================================================================
// Listener reactions
// ============================================================================

#[test]
fn events_are_forwarded_to_the_secondary_broker() {
    let setup = start();
    publish(&setup.bus, "c1");

    assert!(wait_until(WAIT, || setup.secondary.depth(DOWNSTREAM) == 1));
    let forwarded = setup.secondary.browse(DOWNSTREAM);
    assert_eq!(forwarded[0].destination, "consumer.created");
    assert!(wait_until(WAIT, || setup.recorder.len() == 1));
    assert!(setup.bus.status().ok);
}

#[test]
fn outage_holds_secondary_traffic_until_reconnect() {
    let setup = start();
    let monitor = setup.bus.monitor().unwrap();

    setup.secondary.set_available(false);
    assert_eq!(monitor.poll(), ConnectionState::Down);
    let status = setup.bus.status();
    assert!(!status.ok);
    assert_eq!(status.secondary, Some(ConnectionState::Down));

    let forwarder = setup
        .bus
        .manager()
        .receiver("audit_bus.SecondaryBusPublisher")
        .unwrap();
    assert!(forwarder.is_paused());

    publish(&setup.bus, "during-outage");

    // Primary listeners keep going; secondary traffic waits on the primary
    assert!(wait_until(WAIT, || setup.recorder.len() == 1));
    assert_eq!(setup.primary.depth(&secondary_queue()), 1);

    setup.secondary.set_available(true);
    assert_eq!(monitor.poll(), ConnectionState::Connected);
    assert!(!forwarder.is_paused());

    assert!(wait_until(WAIT, || setup.secondary.depth(DOWNSTREAM) == 1));
    assert!(wait_until(WAIT, || setup.primary.depth(&secondary_queue()) == 0));
    assert!(setup.bus.status().ok);
}

#[test]
fn flow_stop_pauses_forwarding_without_loss() {
    let setup = start();
    let monitor = setup.bus.monitor().unwrap();
    let publisher = setup.bus.secondary_publisher().unwrap();

    setup.secondary.set_flow_stopped(DOWNSTREAM, true);
    assert_eq!(monitor.poll(), ConnectionState::FlowStopped);
    assert!(publisher.is_flow_stopped());

    publish(&setup.bus, "held-1");
    publish(&setup.bus, "held-2");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(setup.secondary.depth(DOWNSTREAM), 0);
    assert_eq!(setup.primary.depth(&secondary_queue()), 2);

    setup.secondary.set_flow_stopped(DOWNSTREAM, false);
    assert_eq!(monitor.poll(), ConnectionState::Connected);
    assert!(!publisher.is_flow_stopped());

    assert!(wait_until(WAIT, || setup.secondary.depth(DOWNSTREAM) == 2));
    let forwarded = setup.secondary.browse(DOWNSTREAM);
    assert!(forwarded[0].payload_str().unwrap_or_default().contains("held-1"));
    assert!(forwarded[1].payload_str().unwrap_or_default().contains("held-2"));
}

#[test]
fn missing_binding_holds_secondary_traffic() {
    let setup = start();
    let monitor = setup.bus.monitor().unwrap();

    setup.secondary.unbind("event", DOWNSTREAM);
    assert_eq!(monitor.poll(), ConnectionState::MissingBinding);
    assert!(!setup.bus.status().ok);

    let forwarder = setup
        .bus
        .manager()
        .receiver("audit_bus.SecondaryBusPublisher")
        .unwrap();
    assert!(forwarder.is_paused());

    publish(&setup.bus, "unroutable");
    assert!(wait_until(WAIT, || setup.recorder.len() == 1));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(setup.primary.depth(&secondary_queue()), 1);

    setup.secondary.bind("event", "#", DOWNSTREAM);
    assert_eq!(monitor.poll(), ConnectionState::Connected);
    assert!(!forwarder.is_paused());
    assert!(wait_until(WAIT, || setup.secondary.depth(DOWNSTREAM) == 1));
}

#[test]
fn outage_report_does_not_wait_for_publish_retries() {
    init_tracing();
    let directory = BrokerDirectory::new();
    let primary = directory.register("0");
    let secondary = directory.register("secondary");
    secondary.bind("event", "#", DOWNSTREAM);

    let mut config = secondary_config();
    config.secondary.retry_attempts = 4;
    config.secondary.retry_interval = Duration::from_secs(2);
    let recorder = Recorder::new("recorder");
    let bus = EventBus::builder(config)
        .directory(directory)
        .registry(registry_with(&recorder))
        .start()
        .unwrap();
    let monitor = bus.monitor().unwrap();
    assert!(wait_until(WAIT, || monitor.state() == ConnectionState::Connected));

    // The forwarder is mid-retry when the outage is reported
    secondary.set_available(false);
    publish(&bus, "retrying");
    assert!(wait_until(WAIT, || recorder.len() == 1));
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    assert_eq!(monitor.poll(), ConnectionState::Down);
    assert!(started.elapsed() < Duration::from_millis(500));

    secondary.set_available(true);
    assert_eq!(monitor.poll(), ConnectionState::Connected);
    assert!(wait_until(WAIT, || secondary.depth(DOWNSTREAM) == 1));
    assert!(wait_until(WAIT, || primary.depth(&secondary_queue()) == 0));
}

// ============================================================================
// Background poller
// ============================================================================

#[test]
fn poller_notices_outages_on_its_own() {
    init_tracing();
    let broker = InMemoryBroker::new("secondary");
    broker.bind("event", "#", DOWNSTREAM);
    let monitor = Arc::new(SecondaryBrokerStatusMonitor::new(
        Arc::new(broker.management_client(Duration::from_millis(20))),
        "event",
    ));
    let transitions = Arc::new(Transitions::default());
    monitor.register(transitions.clone());

    let poller = MonitorThread::spawn(Arc::clone(&monitor), Duration::from_millis(10));
    assert!(wait_until(WAIT, || monitor.state() == ConnectionState::Connected));

    broker.set_available(false);
    assert!(wait_until(WAIT, || monitor.state() == ConnectionState::Down));
    broker.set_available(true);
    assert!(wait_until(WAIT, || monitor.state() == ConnectionState::Connected));

    let stats = poller.stop();
    assert!(stats.polls >= 3);
    assert!(stats.down_polls >= 1);
    assert_eq!(transitions.seen().len(), 2);
}
