//! Queue health across the primary and secondary brokers.

use std::sync::Arc;
use std::time::Duration;

use audit_bus::bus::InMemoryBroker;
use audit_bus::{EventType, Target};

use crate::support::{event, wait_until, Recorder, WAIT};
use crate::Fixture;

#[test]
fn queue_info_is_sorted_and_deduplicated() {
    let fixture = Fixture::new();
    let mut manager = fixture.manager();
    manager.add_listener(Recorder::new("zeta"));
    manager.add_listener(Recorder::new("alpha"));
    manager.connect_all().unwrap();
    manager.receiver("alpha").unwrap().pause();

    fixture.publish(&[
        event(EventType::Created, Target::Consumer, "c1"),
        event(EventType::Created, Target::Consumer, "c2"),
    ]);

    assert!(wait_until(WAIT, || {
        manager
            .get_queue_info()
            .iter()
            .any(|q| q.queue_name == "event.zeta" && q.pending_message_count == 0)
    }));

    let info = manager.get_queue_info();
    let names: Vec<&str> = info.iter().map(|q| q.queue_name.as_str()).collect();
    assert_eq!(names, ["event.alpha", "event.zeta"]);
    assert_eq!(info[0].pending_message_count, 2);
    assert!(info[0].last_message_id.is_some());
}

#[test]
fn secondary_queues_are_reported_when_reachable() {
    let fixture = Fixture::new();
    let secondary = InMemoryBroker::new("secondary");
    secondary.bind("event", "#", "downstream.audit");

    let mut manager = fixture
        .manager()
        .with_secondary(Arc::new(secondary.management_client(Duration::from_millis(20))), "event");
    manager.add_listener(Recorder::new("recorder"));
    manager.connect_all().unwrap();

    let health = manager.queue_health();
    assert_eq!(
        health.keys().map(String::as_str).collect::<Vec<_>>(),
        ["downstream.audit", "event.recorder"]
    );

    secondary.set_available(false);
    let health = manager.queue_health();
    assert_eq!(
        health.keys().map(String::as_str).collect::<Vec<_>>(),
        ["event.recorder"]
    );
}

#[test]
fn closed_receivers_do_not_reconnect_for_status() {
    let fixture = Fixture::new();
    let mut manager = fixture.manager();
    manager.add_listener(Recorder::new("recorder"));
    manager.connect_all().unwrap();
    assert!(manager.receiver("recorder").unwrap().queue_status().is_ok());

    manager.close_all();
    fixture.ingress.close();

    assert!(manager.receiver("recorder").unwrap().queue_status().is_err());
    assert!(manager.queue_health().is_empty());
    assert!(fixture.ingress.is_closed());
}
