//! Outbox integration tests.
//!
//! Events queued through the bus sink travel over the primary broker to
//! listener receivers:
//! - nothing leaves before commit, and commit preserves queue order
//! - rollback and abandoned units of work publish nothing
//! - the filter drops events before they reach the broker
//! - a disabled bus accepts and drops everything

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use audit_bus::connection::EgressConnection;
use audit_bus::sink::TransactionalEventSink;
use audit_bus::{
    BrokerError, EventBus, EventConfig, EventFilter, EventSink, EventType, Target, UnitOfWork,
};

use support::{event, init_tracing, primary, registry_with, test_config, wait_until, Recorder, WAIT};

// ============================================================================
// Commit
// ============================================================================

#[test]
fn committed_events_arrive_in_queue_order() {
    init_tracing();
    let (directory, _broker) = primary();
    let recorder = Recorder::new("recorder");
    let bus = EventBus::builder(test_config())
        .directory(directory)
        .registry(registry_with(&recorder))
        .start()
        .unwrap();

    let sink = bus.sink();
    let mut uow = UnitOfWork::new();
    sink.queue_event(&mut uow, event(EventType::Created, Target::Consumer, "e1"));
    sink.queue_event(&mut uow, event(EventType::Modified, Target::Consumer, "e2"));
    sink.queue_event(&mut uow, event(EventType::Created, Target::Pool, "e3"));
    assert!(uow.is_active());
    assert_eq!(uow.queued(), 3);

    // Buffered until commit
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.len(), 0);

    sink.send_events(&mut uow);
    assert!(!uow.is_active());

    assert!(wait_until(WAIT, || recorder.len() == 3));
    assert_eq!(recorder.entities(), ["e1", "e2", "e3"]);

    let receiver = bus.manager().receiver("recorder").unwrap();
    assert_eq!(receiver.stats().messages_handled, 3);
    bus.shutdown();
    assert!(bus.status().queues.is_empty());
}

#[test]
fn each_unit_of_work_publishes_independently() {
    init_tracing();
    let (directory, _broker) = primary();
    let recorder = Recorder::new("recorder");
    let bus = EventBus::builder(test_config())
        .directory(directory)
        .registry(registry_with(&recorder))
        .start()
        .unwrap();

    let sink = bus.sink();
    let mut first = UnitOfWork::new();
    let mut second = UnitOfWork::new();
    sink.queue_event(&mut first, event(EventType::Created, Target::Owner, "a"));
    sink.queue_event(&mut second, event(EventType::Created, Target::Owner, "b"));

    sink.send_events(&mut second);
    assert!(wait_until(WAIT, || recorder.len() == 1));
    sink.rollback(&mut first);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.entities(), ["b"]);
}

// ============================================================================
// Rollback
// ============================================================================

#[test]
fn rollback_publishes_nothing() {
    init_tracing();
    let (directory, broker) = primary();
    broker.bind("event", "#", "event.audit");
    let egress = Arc::new(EgressConnection::primary(&EventConfig::default(), &directory).unwrap());
    let sink = TransactionalEventSink::new(egress, EventFilter::disabled());

    let mut uow = UnitOfWork::new();
    sink.queue_event(&mut uow, event(EventType::Created, Target::Consumer, "e1"));
    sink.queue_event(&mut uow, event(EventType::Deleted, Target::Consumer, "e2"));
    sink.rollback(&mut uow);

    assert!(!uow.is_active());
    assert_eq!(broker.depth("event.audit"), 0);

    // The next unit of work is unaffected
    sink.queue_event(&mut uow, event(EventType::Created, Target::Consumer, "e3"));
    sink.send_events(&mut uow);
    assert_eq!(broker.depth("event.audit"), 1);
}

#[test]
fn dropped_unit_of_work_rolls_back() {
    init_tracing();
    let (directory, broker) = primary();
    broker.bind("event", "#", "event.audit");
    let egress = Arc::new(EgressConnection::primary(&EventConfig::default(), &directory).unwrap());
    let sink = TransactionalEventSink::new(egress, EventFilter::disabled());

    {
        let mut uow = UnitOfWork::new();
        sink.queue_event(&mut uow, event(EventType::Created, Target::Consumer, "lost"));
    }
    assert_eq!(broker.depth("event.audit"), 0);
}

#[test]
fn broker_outage_never_reaches_the_caller() {
    init_tracing();
    let (directory, broker) = primary();
    broker.bind("event", "#", "event.audit");
    let egress = Arc::new(EgressConnection::primary(&EventConfig::default(), &directory).unwrap());
    let sink = TransactionalEventSink::new(egress, EventFilter::disabled());

    broker.set_available(false);
    let mut uow = UnitOfWork::new();
    sink.queue_event(&mut uow, event(EventType::Created, Target::Consumer, "dropped"));
    assert!(!uow.is_active());
    sink.send_events(&mut uow);

    // Reconnects on the next unit of work
    broker.set_available(true);
    sink.queue_event(&mut uow, event(EventType::Created, Target::Consumer, "kept"));
    sink.send_events(&mut uow);

    let kept = broker.browse("event.audit");
    assert_eq!(kept.len(), 1);
    assert!(kept[0].payload_str().unwrap_or_default().contains("kept"));
}

// ============================================================================
// Filtering
// ============================================================================

#[test]
fn filter_keeps_only_protected_events() {
    init_tracing();
    let (directory, _broker) = primary();
    let recorder = Recorder::new("recorder");
    let mut config = test_config();
    config.filter.enabled = true;
    config.filter.policy = "DO_FILTER".to_string();

    let bus = EventBus::builder(config)
        .directory(directory)
        .registry(registry_with(&recorder))
        .start()
        .unwrap();

    let sink = bus.sink();
    let mut uow = UnitOfWork::new();
    sink.queue_event(&mut uow, event(EventType::Modified, Target::Consumer, "filtered"));
    sink.queue_event(&mut uow, event(EventType::Created, Target::Pool, "pool"));
    sink.queue_event(&mut uow, event(EventType::Created, Target::Entitlement, "ent"));
    assert_eq!(uow.queued(), 2);
    sink.send_events(&mut uow);

    assert!(wait_until(WAIT, || recorder.len() == 2));
    assert_eq!(recorder.entities(), ["pool", "ent"]);
}

#[test]
fn invalid_filter_policy_fails_startup() {
    let (directory, _broker) = primary();
    let mut config = test_config();
    config.filter.policy = "SOMETIMES".to_string();

    let err = EventBus::builder(config)
        .directory(directory)
        .registry(registry_with(&Recorder::new("recorder")))
        .start()
        .err()
        .unwrap();
    assert!(err.to_string().contains("SOMETIMES"));
}

// ============================================================================
// Disabled bus and direct sends
// ============================================================================

#[test]
fn disabled_bus_drops_everything() {
    init_tracing();
    let (directory, broker) = primary();
    let recorder = Recorder::new("recorder");
    let mut config = test_config();
    config.enabled = false;

    let bus = EventBus::builder(config)
        .directory(directory)
        .registry(registry_with(&recorder))
        .start()
        .unwrap();

    let sink = bus.sink();
    let mut uow = UnitOfWork::new();
    sink.queue_event(&mut uow, event(EventType::Created, Target::Consumer, "e1"));
    assert!(!uow.is_active());
    sink.send_events(&mut uow);
    sink.rollback(&mut uow);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.len(), 0);
    assert_eq!(broker.depth("event.recorder"), 0);
}

#[test]
fn direct_publisher_reports_backpressure() {
    init_tracing();
    let (directory, broker) = primary();
    let recorder = Recorder::new("recorder");
    let bus = EventBus::builder(test_config())
        .directory(directory)
        .registry(registry_with(&recorder))
        .start()
        .unwrap();

    let direct = bus.direct_publisher();
    assert!(direct.send(&event(EventType::Created, Target::Rules, "r1")).unwrap());
    assert!(wait_until(WAIT, || recorder.len() == 1));

    broker.set_flow_stopped("event.recorder", true);
    let err = direct
        .send(&event(EventType::Created, Target::Rules, "r2"))
        .unwrap_err();
    assert_eq!(
        err,
        BrokerError::FlowStopped {
            queue: "event.recorder".into()
        }
    );
}
