//! Job workers on the shared `jobs` queue.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use audit_bus::bus::{properties, Session};
use audit_bus::receiver::{ReceiverKind, JOBS_DESTINATION};
use audit_bus::{EventType, JobDispatcher, JobMessage, ListenerError, Target};
use serde_json::json;

use crate::support::{event, wait_until, Recorder, WAIT};
use crate::Fixture;

#[derive(Default)]
struct Jobs {
    seen: Mutex<Vec<JobMessage>>,
}

impl JobDispatcher for Jobs {
    fn dispatch(&self, job: JobMessage) -> Result<(), ListenerError> {
        if job.arguments.get("fail").is_some() {
            return Err(ListenerError::Failed("job failed".into()));
        }
        self.seen.lock().unwrap().push(job);
        Ok(())
    }
}

impl Jobs {
    fn keys(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|j| j.job_key.clone())
            .collect()
    }
}

fn submit(fixture: &Fixture, jobs: &[JobMessage]) {
    let session = fixture.egress.create_session().unwrap();
    for job in jobs {
        session.send(job.to_message().unwrap()).unwrap();
    }
    session.commit().unwrap();
    session.close();
}

#[test]
fn workers_take_only_enabled_jobs() {
    let fixture = Fixture::new();
    let jobs = Arc::new(Jobs::default());
    let mut manager = fixture.manager();
    manager.add_job_workers(
        jobs.clone(),
        &["RefreshPools".to_string(), "UndoImports".to_string()],
        3,
    );
    assert_eq!(manager.receivers().len(), 3);
    assert!(manager
        .receivers()
        .iter()
        .all(|r| r.kind() == ReceiverKind::Job && r.queue_name() == JOBS_DESTINATION));
    manager.connect_all().unwrap();

    submit(
        &fixture,
        &[
            JobMessage::new("RefreshPools", json!({ "owner": "acme" })),
            JobMessage::new("ExportJob", json!({})),
            JobMessage::new("UndoImports", json!({ "owner": "acme" })),
        ],
    );

    assert!(wait_until(WAIT, || jobs.keys().len() == 2));
    let mut keys = jobs.keys();
    keys.sort();
    assert_eq!(keys, ["RefreshPools", "UndoImports"]);

    // Not enabled here, left for whoever handles it
    assert!(wait_until(WAIT, || fixture.broker.depth(JOBS_DESTINATION) == 1));
    thread::sleep(Duration::from_millis(50));
    let left = fixture.broker.browse(JOBS_DESTINATION);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].property(properties::JOB_KEY), Some("ExportJob"));
}

#[test]
fn failed_jobs_are_discarded() {
    let fixture = Fixture::new();
    let jobs = Arc::new(Jobs::default());
    let mut manager = fixture.manager();
    manager.add_job_workers(jobs.clone(), &["RefreshPools".to_string()], 1);
    manager.connect_all().unwrap();

    submit(
        &fixture,
        &[
            JobMessage::new("RefreshPools", json!({ "fail": true })),
            JobMessage::new("RefreshPools", json!({ "owner": "acme" })),
        ],
    );

    assert!(wait_until(WAIT, || jobs.keys().len() == 1));
    let worker = manager.receiver("job-worker-0").unwrap();
    assert_eq!(worker.stats().messages_discarded, 1);
    assert!(wait_until(WAIT, || fixture.broker.depth(JOBS_DESTINATION) == 0));
}

#[test]
fn no_enabled_jobs_means_no_workers() {
    let fixture = Fixture::new();
    let mut manager = fixture.manager();
    manager.add_job_workers(Arc::new(Jobs::default()), &[], 4);
    assert!(manager.receivers().is_empty());
}

#[test]
fn jobs_stay_out_of_listener_queues() {
    let fixture = Fixture::new();
    let jobs = Arc::new(Jobs::default());
    let recorder = Recorder::new("recorder");
    let mut manager = fixture.manager();
    manager.add_listener(recorder.clone());
    manager.add_job_workers(jobs.clone(), &["RefreshPools".to_string()], 1);
    manager.connect_all().unwrap();

    submit(&fixture, &[JobMessage::new("RefreshPools", json!({ "owner": "acme" }))]);
    fixture.publish(&[event(EventType::Created, Target::Consumer, "c1")]);

    assert!(wait_until(WAIT, || jobs.keys().len() == 1));
    assert!(wait_until(WAIT, || recorder.len() == 1));
    thread::sleep(Duration::from_millis(50));

    let listener = manager.receiver("recorder").unwrap().stats();
    assert_eq!(listener.messages_handled, 1);
    assert_eq!(listener.messages_discarded, 0);
    assert_eq!(recorder.attempts(), 1);
    assert_eq!(fixture.broker.depth("event.recorder"), 0);
}
