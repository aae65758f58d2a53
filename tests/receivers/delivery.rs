//! Acknowledge, discard, redelivery and pause/resume.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use audit_bus::bus::{properties, Session};
use audit_bus::receiver::{
    EventDispatch, MessageReceiver, ReceiverKind, ReceiverSpec, EVENT_DESTINATIONS,
};
use audit_bus::{EventType, Target};

use crate::support::{event, wait_until, Recorder, Script, WAIT};
use crate::Fixture;

#[test]
fn handled_messages_are_acknowledged() {
    let fixture = Fixture::new();
    let recorder = Recorder::new("recorder");
    let mut manager = fixture.manager();
    manager.add_listener(recorder.clone());
    manager.connect_all().unwrap();

    fixture.publish(&[
        event(EventType::Created, Target::Consumer, "c1"),
        event(EventType::Deleted, Target::Consumer, "c1"),
    ]);

    assert!(wait_until(WAIT, || recorder.len() == 2));
    let receiver = manager.receiver("recorder").unwrap();
    assert!(wait_until(WAIT, || receiver.stats().messages_handled == 2));
    assert_eq!(fixture.broker.depth("event.recorder"), 0);
    assert_eq!(receiver.stats().messages_discarded, 0);

    manager.close_all();
}

#[test]
fn failed_messages_are_discarded() {
    let fixture = Fixture::new();
    let recorder = Recorder::new("recorder");
    recorder.then(Script::Fail);
    let mut manager = fixture.manager();
    manager.add_listener(recorder.clone());
    manager.connect_all().unwrap();

    fixture.publish(&[
        event(EventType::Created, Target::Pool, "poison"),
        event(EventType::Created, Target::Pool, "good"),
    ]);

    assert!(wait_until(WAIT, || recorder.len() == 1));
    assert_eq!(recorder.entities(), ["good"]);

    let stats = manager.receiver("recorder").unwrap().stats();
    assert_eq!(stats.messages_discarded, 1);
    assert_eq!(stats.messages_retried, 0);

    // Never redelivered
    thread::sleep(Duration::from_millis(100));
    assert_eq!(recorder.attempts(), 2);
    assert_eq!(fixture.broker.depth("event.recorder"), 0);
}

#[test]
fn connectivity_failures_are_redelivered() {
    let fixture = Fixture::new();
    let recorder = Recorder::new("recorder");
    recorder.then(Script::Disconnect);
    recorder.then(Script::Disconnect);
    let mut manager = fixture.manager();
    manager.add_listener(recorder.clone());
    manager.connect_all().unwrap();

    fixture.publish(&[event(EventType::Modified, Target::Owner, "o1")]);

    assert!(wait_until(WAIT, || recorder.len() == 1));
    assert_eq!(recorder.attempts(), 3);
    assert_eq!(recorder.entities(), ["o1"]);

    let receiver = manager.receiver("recorder").unwrap();
    assert!(wait_until(WAIT, || receiver.stats().messages_handled == 1));
    let stats = receiver.stats();
    assert_eq!(stats.messages_retried, 2);
    assert_eq!(stats.messages_discarded, 0);
}

#[test]
fn pause_and_resume_lose_nothing() {
    let fixture = Fixture::new();
    let recorder = Recorder::new("recorder");
    let mut manager = fixture.manager();
    let receiver = manager.add_listener(recorder.clone());
    assert_eq!(receiver.queue_name(), "event.recorder");
    manager.connect_all().unwrap();

    let receiver = manager.receiver("recorder").unwrap();
    receiver.pause();
    receiver.pause();
    assert!(receiver.is_paused());
    assert!(!receiver.is_running());

    fixture.publish(&[
        event(EventType::Created, Target::Product, "p1"),
        event(EventType::Created, Target::Product, "p2"),
        event(EventType::Created, Target::Product, "p3"),
    ]);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.len(), 0);
    assert_eq!(fixture.broker.depth("event.recorder"), 3);

    assert!(receiver.resume());
    assert!(wait_until(WAIT, || recorder.len() == 3));
    assert_eq!(recorder.entities(), ["p1", "p2", "p3"]);
}

#[test]
fn close_is_idempotent_and_final() {
    let fixture = Fixture::new();
    let recorder = Recorder::new("recorder");
    let mut manager = fixture.manager();
    manager.add_listener(recorder.clone());
    manager.connect_all().unwrap();

    let receiver = manager.receiver("recorder").unwrap();
    receiver.close();
    receiver.close();
    receiver.pause();
    assert!(receiver.is_closed());
    assert!(!receiver.resume());

    fixture.publish(&[event(EventType::Created, Target::User, "u1")]);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.len(), 0);
    assert_eq!(fixture.broker.depth("event.recorder"), 1);
}

#[test]
fn receivers_recover_from_a_broker_outage() {
    let fixture = Fixture::new();
    let recorder = Recorder::new("recorder");
    let mut manager = fixture.manager();
    manager.add_listener(recorder.clone());
    manager.connect_all().unwrap();

    fixture.publish(&[event(EventType::Created, Target::Role, "before")]);
    assert!(wait_until(WAIT, || recorder.len() == 1));

    fixture.broker.set_available(false);
    thread::sleep(Duration::from_millis(50));
    fixture.broker.set_available(true);

    fixture.publish(&[event(EventType::Created, Target::Role, "after")]);
    assert!(wait_until(WAIT, || recorder.len() == 2));
    assert_eq!(recorder.entities(), ["before", "after"]);
    assert!(manager.receiver("recorder").unwrap().is_running());
}

#[test]
fn diverted_messages_follow_the_normal_policy() {
    let fixture = Fixture::new();
    let recorder = Recorder::new("forwarder");
    let receiver = MessageReceiver::new(
        "forwarder",
        ReceiverSpec {
            queue: "event.forwarder".to_string(),
            binding_key: Some(EVENT_DESTINATIONS.to_string()),
            selector: None,
            kind: ReceiverKind::Secondary,
            poll_interval: Duration::from_millis(10),
            retry_interval: Duration::from_millis(20),
        },
        Arc::clone(&fixture.ingress),
        Arc::new(EventDispatch::new(recorder.clone())),
    );
    receiver.connect().unwrap();

    let diverted = event(EventType::Created, Target::Consumer, "c1")
        .to_message()
        .unwrap()
        .with_property(properties::ORIGINAL_DESTINATION, "consumer.created");
    let session = fixture.egress.create_session().unwrap();
    session.send(diverted).unwrap();
    session.commit().unwrap();
    session.close();

    assert!(wait_until(WAIT, || receiver.stats().messages_handled == 1));
    assert_eq!(recorder.entities(), ["c1"]);
    assert_eq!(receiver.stats().messages_discarded, 0);
    assert_eq!(fixture.broker.depth("event.forwarder"), 0);
    receiver.close();
}
