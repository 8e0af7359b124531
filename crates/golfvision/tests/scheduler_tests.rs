mod common;

use std::sync::atomic::Ordering;

use common::{drain_events, events_for, statuses, test_config, FakeEngines, Harness};
use golfvision::db::Database;
use golfvision::store::{JobStore, SqliteJobStore};
use golfvision::{
    GolfVision, GolfVisionError, Job, JobEvent, JobId, JobStatus, SchedulerError, SubmitRequest,
    ValidationError,
};

fn cancelled_updates(events: &[JobEvent], id: &JobId) -> usize {
    events_for(events, id)
        .filter(|e| matches!(e, JobEvent::Update(s) if s.status == JobStatus::Cancelled))
        .count()
}

#[tokio::test]
async fn test_second_submit_in_same_tick_cancels_first() {
    let h = Harness::new();
    let mut rx = h.service.subscribe_all();

    let a = h
        .service
        .submit(SubmitRequest::new("Augusta National Golf Club"))
        .unwrap();
    let b = h
        .service
        .submit(SubmitRequest::new("Pebble Beach Golf Links"))
        .unwrap();

    // Pre-emption is visible as soon as submit returns.
    let a_now = h.service.get(&a.id).unwrap().unwrap();
    assert_eq!(a_now.status, JobStatus::Cancelled);
    assert_eq!(a_now.progress, 0);

    h.service.wait_idle().await;
    let events = drain_events(&mut rx);

    assert_eq!(cancelled_updates(&events, &a.id), 1);
    assert_eq!(statuses(&events, &a.id), vec![JobStatus::Cancelled]);
    assert_eq!(
        h.service.get(&b.id).unwrap().unwrap().status,
        JobStatus::Completed
    );
    // A never reached an engine.
    assert_eq!(
        h.fakes.calls_for("geocode"),
        vec!["geocode:Pebble Beach Golf Links".to_string()]
    );
}

#[tokio::test]
async fn test_submit_preempts_job_mid_render() {
    let h = Harness::new();
    h.fakes.hold_renders.store(1, Ordering::SeqCst);
    let mut rx = h.service.subscribe_all();

    let a = h
        .service
        .submit(SubmitRequest::new("St. Andrews Old Course"))
        .unwrap();
    h.wait_for_status(&a.id, JobStatus::Rendering).await;
    assert!(h.workspace_root().join(a.id.as_str()).exists());

    let b = h
        .service
        .submit(SubmitRequest::new("Pinehurst No. 2"))
        .unwrap();
    assert_eq!(
        h.service.get(&a.id).unwrap().unwrap().status,
        JobStatus::Cancelled
    );
    assert_eq!(h.service.counts().unwrap().active, 1);

    h.service.wait_idle().await;
    let events = drain_events(&mut rx);

    assert_eq!(cancelled_updates(&events, &a.id), 1);
    assert_eq!(statuses(&events, &a.id).last(), Some(&JobStatus::Cancelled));
    assert!(!events_for(&events, &a.id)
        .any(|e| matches!(e, JobEvent::Complete(_) | JobEvent::Error { .. })));

    let a_final = h.service.get(&a.id).unwrap().unwrap();
    assert_eq!(a_final.status, JobStatus::Cancelled);
    assert!(a_final.output.is_none());
    assert!(!h.workspace_root().join(a.id.as_str()).exists());

    assert_eq!(
        h.service.get(&b.id).unwrap().unwrap().status,
        JobStatus::Completed
    );
    // Nothing after rendering ran for A.
    assert!(h
        .fakes
        .calls_for("speech")
        .iter()
        .all(|c| c.ends_with(b.id.as_str())));
}

#[tokio::test]
async fn test_at_most_one_job_is_active() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for name in ["A", "B", "C", "D", "E"] {
        ids.push(h.service.submit(SubmitRequest::new(name)).unwrap().id);
        assert_eq!(h.service.counts().unwrap().active, 1);
    }

    h.service.wait_idle().await;
    let counts = h.service.counts().unwrap();
    assert_eq!(counts.total, 5);
    assert_eq!(counts.cancelled, 4);
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.active, 0);
    assert_eq!(
        h.service.get(&ids[4]).unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let h = Harness::new();
    h.fakes.hold_renders.store(1, Ordering::SeqCst);
    let mut rx = h.service.subscribe_all();

    let job = h.service.submit(SubmitRequest::new("Bacon Park Golf Course")).unwrap();
    h.wait_for_status(&job.id, JobStatus::Rendering).await;

    assert!(h.service.cancel(&job.id).unwrap());
    assert!(!h.service.cancel(&job.id).unwrap());
    assert!(!h.service.cancel(&job.id).unwrap());

    h.service.wait_idle().await;
    let events = drain_events(&mut rx);
    assert_eq!(cancelled_updates(&events, &job.id), 1);

    let stored = h.service.get(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert_eq!(stored.progress, 0);
}

#[tokio::test]
async fn test_cancel_finished_and_unknown_jobs() {
    let h = Harness::new();
    let job = h.service.submit(SubmitRequest::new("Augusta National Golf Club")).unwrap();
    h.service.wait_idle().await;

    assert!(!h.service.cancel(&job.id).unwrap());
    assert_eq!(
        h.service.get(&job.id).unwrap().unwrap().status,
        JobStatus::Completed
    );

    let err = h.service.cancel(&JobId::from("no-such-job")).unwrap_err();
    assert!(matches!(
        err,
        GolfVisionError::Scheduler(SchedulerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_all_active() {
    let h = Harness::new();
    h.fakes.hold_renders.store(1, Ordering::SeqCst);
    assert!(h.service.cancel_all_active().unwrap().is_empty());

    let job = h.service.submit(SubmitRequest::new("Pinehurst No. 2")).unwrap();
    h.wait_for_status(&job.id, JobStatus::Rendering).await;

    assert_eq!(h.service.cancel_all_active().unwrap(), vec![job.id.clone()]);
    assert!(h.service.cancel_all_active().unwrap().is_empty());
    h.service.wait_idle().await;
    assert_eq!(h.service.counts().unwrap().cancelled, 1);
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected_without_side_effects() {
    let h = Harness::new();
    h.fakes.hold_renders.store(1, Ordering::SeqCst);
    let running = h.service.submit(SubmitRequest::new("Augusta National Golf Club")).unwrap();
    h.wait_for_status(&running.id, JobStatus::Rendering).await;

    let cases = [
        (SubmitRequest::new(""), ValidationError::EmptySubject),
        (
            SubmitRequest::new("x".repeat(201)),
            ValidationError::SubjectTooLong { len: 201, max: 200 },
        ),
        (
            SubmitRequest::new("Somewhere").with_coordinates(91.0, 0.0),
            ValidationError::CoordinatesOutOfRange { lat: 91.0, lng: 0.0 },
        ),
        (
            SubmitRequest::new("Somewhere").with_seed(1_000_000),
            ValidationError::SeedOutOfRange {
                seed: 1_000_000,
                max: 999_999,
            },
        ),
    ];
    for (request, expected) in cases {
        match h.service.submit(request) {
            Err(GolfVisionError::Validation(e)) => assert_eq!(e, expected),
            other => panic!("expected validation error, got {:?}", other.map(|j| j.id)),
        }
    }

    // The running job was not pre-empted by rejected submissions.
    assert_eq!(h.service.list().unwrap().len(), 1);
    assert_eq!(
        h.service.get(&running.id).unwrap().unwrap().status,
        JobStatus::Rendering
    );
    h.fakes.release_renders();
    h.service.wait_idle().await;
    assert_eq!(
        h.service.get(&running.id).unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_subject_name_is_trimmed() {
    let h = Harness::new();
    let job = h
        .service
        .submit(SubmitRequest::new("  Pebble Beach Golf Links  ").with_seed(7))
        .unwrap();
    assert_eq!(job.subject_name, "Pebble Beach Golf Links");
    assert_eq!(job.seed, Some(7));
    h.service.wait_idle().await;
}

#[tokio::test]
async fn test_list_and_delete() {
    let h = Harness::new();
    let first = h.service.submit(SubmitRequest::new("A")).unwrap();
    h.service.wait_idle().await;
    let second = h.service.submit(SubmitRequest::new("B")).unwrap();
    h.service.wait_idle().await;

    let listed: Vec<JobId> = h.service.list().unwrap().into_iter().map(|j| j.id).collect();
    assert_eq!(listed, vec![second.id.clone(), first.id.clone()]);

    let publisher = h.service.scheduler().ledger().publisher().clone();
    let watcher = h.service.subscribe(&first.id);
    assert_eq!(publisher.subscriber_count(&first.id), 1);

    assert!(h.service.delete(&first.id).unwrap());
    assert_eq!(publisher.subscriber_count(&first.id), 0);
    drop(watcher);
    assert!(!h.service.delete(&first.id).unwrap());
    assert!(h.service.get(&first.id).unwrap().is_none());
    assert_eq!(h.service.list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_per_job_subscription_sees_only_its_job() {
    let h = Harness::new();
    h.fakes.hold_renders.store(1, Ordering::SeqCst);
    let job = h.service.submit(SubmitRequest::new("Pinehurst No. 2")).unwrap();
    let mut sub = h.service.subscribe(&job.id);
    let publisher = h.service.scheduler().ledger().publisher().clone();
    assert_eq!(publisher.subscriber_count(&job.id), 1);

    h.wait_for_status(&job.id, JobStatus::Rendering).await;
    let other = h.service.submit(SubmitRequest::new("Other")).unwrap();
    h.service.wait_idle().await;

    let mut seen = Vec::new();
    while let Some(event) = sub.try_recv() {
        assert_eq!(event.job_id(), &job.id);
        seen.push(event);
    }
    assert_eq!(
        statuses(&seen, &job.id),
        vec![
            JobStatus::Geocoding,
            JobStatus::FetchingData,
            JobStatus::BuildingModel,
            JobStatus::Rendering,
            JobStatus::Cancelled,
        ]
    );
    assert_ne!(other.id, job.id);

    h.service.unsubscribe(sub);
    assert_eq!(publisher.subscriber_count(&job.id), 0);

    // Dropping without unsubscribing releases the channel too.
    {
        let _sub = h.service.subscribe(&other.id);
        assert_eq!(publisher.subscriber_count(&other.id), 1);
    }
    assert_eq!(publisher.subscriber_count(&other.id), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_and_rejects() {
    let h = Harness::new();
    h.fakes.hold_renders.store(1, Ordering::SeqCst);
    let job = h.service.submit(SubmitRequest::new("Augusta National Golf Club")).unwrap();
    h.wait_for_status(&job.id, JobStatus::Rendering).await;

    h.service.shutdown().unwrap();
    assert_eq!(
        h.service.get(&job.id).unwrap().unwrap().status,
        JobStatus::Cancelled
    );
    assert!(matches!(
        h.service.submit(SubmitRequest::new("Later")),
        Err(GolfVisionError::Scheduler(SchedulerError::ShutDown))
    ));
    h.service.wait_idle().await;
}

// ─── Persistence ───

#[tokio::test]
async fn test_jobs_survive_restart_with_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.database = Some(dir.path().join("data").join("jobs.db"));

    let job_id = {
        let fakes = FakeEngines::new();
        let service = GolfVision::with_engines(config.clone(), fakes.engines()).unwrap();
        let job = service
            .submit(SubmitRequest::new("Pebble Beach Golf Links"))
            .unwrap();
        service.wait_idle().await;
        service.shutdown().unwrap();
        job.id
    };

    let fakes = FakeEngines::new();
    let service = GolfVision::with_engines(config, fakes.engines()).unwrap();
    let job = service.get(&job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.output.unwrap().metadata.resolution, "1920x1080");
}

#[tokio::test]
async fn test_startup_fails_jobs_left_active() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    let db_path = dir.path().join("jobs.db");
    config.database = Some(db_path.clone());

    let mut stale = Job::new(SubmitRequest::new("Interrupted Links"));
    stale.status = JobStatus::Rendering;
    stale.progress = 70;
    {
        let store = SqliteJobStore::new(Database::open(&db_path).unwrap());
        store.put(&stale).unwrap();
    }

    let fakes = FakeEngines::new();
    let service = GolfVision::with_engines(config, fakes.engines()).unwrap();
    let recovered = service.get(&stale.id).unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Failed);
    assert_eq!(recovered.progress, 0);
    assert_eq!(recovered.errors, vec!["Interrupted by service restart".to_string()]);
    assert_eq!(service.counts().unwrap().active, 0);
}
