// crates/core/tests/lifecycle.rs
//! End-to-end lifecycle flows spanning manager, broker, and executor.

use std::time::Duration;

use serde_json::json;

use darkroom_core::{
    CreateJob, EventFilter, EventKind, JobError, JobFailure, JobId, JobManager, JobStatus,
    StreamItem,
};

async fn wait_for_status(manager: &JobManager, id: JobId, status: JobStatus) {
    for _ in 0..400 {
        if manager.get(id).unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "job {id} never reached {status:?}, currently {:?}",
        manager.get(id).unwrap().status
    );
}

/// Create with steps -> start -> half progress -> cancel -> further
/// progress rejected.
#[tokio::test]
async fn cancelled_job_rejects_further_progress() {
    let manager = JobManager::new();
    let id = manager
        .create(
            CreateJob::new("frame_analysis", "Analyze clip")
                .total_steps(2)
                .cancelable(true),
        )
        .unwrap();
    assert_eq!(manager.get(id).unwrap().status, JobStatus::Queued);

    let job = manager.start(id).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.started_at.is_some());

    let job = manager.update_progress(id, 0.5, Some(1)).unwrap();
    assert_eq!(job.progress, 0.5);

    let job = manager.cancel(id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);

    let err = manager.update_progress(id, 0.75, Some(2)).unwrap_err();
    assert!(matches!(
        err,
        JobError::InvalidState {
            op: "update_progress",
            ..
        }
    ));
    // Progress frozen at the pre-cancel value.
    assert_eq!(manager.get(id).unwrap().progress, 0.5);
}

/// Parent with two children: derived progress tracks completed/total and
/// the parent auto-completes with the last child.
#[tokio::test]
async fn parent_completes_with_children() {
    let manager = JobManager::new();
    let parent = manager
        .create(CreateJob::new("batch", "Process upload batch"))
        .unwrap();
    let c1 = manager
        .create(CreateJob::new("frame_analysis", "clip 1").parent(parent))
        .unwrap();
    let c2 = manager
        .create(CreateJob::new("frame_analysis", "clip 2").parent(parent))
        .unwrap();

    manager.start(c1).unwrap();
    manager.complete(c1, json!({ "clip": 1 })).unwrap();
    assert_eq!(manager.get(parent).unwrap().progress, 0.5);

    manager.start(c2).unwrap();
    manager.complete(c2, json!({ "clip": 2 })).unwrap();

    let parent_job = manager.get(parent).unwrap();
    assert_eq!(parent_job.status, JobStatus::Completed);
    assert_eq!(parent_job.progress, 1.0);
    assert_eq!(parent_job.child_ids, vec![c1, c2]);
}

/// Pause-for-input round trip driven through the executor binding.
#[tokio::test]
async fn pause_resume_scenario() {
    let manager = JobManager::new();
    let id = manager
        .spawn(
            CreateJob::new("video_generate", "Generate teaser"),
            |ctx| async move {
                let decision = ctx.await_input(json!({ "preview": "x" })).await?;
                ctx.update_progress(0.9, None)?;
                Ok(json!({ "accepted": decision }))
            },
        )
        .unwrap();

    wait_for_status(&manager, id, JobStatus::AwaitingInput).await;
    assert_eq!(
        manager.get(id).unwrap().awaiting_data,
        Some(json!({ "preview": "x" }))
    );

    let job = manager
        .resume_with_input(id, json!({ "approved": true }))
        .unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.awaiting_data.is_none());
    assert_eq!(job.user_input, Some(json!({ "approved": true })));

    wait_for_status(&manager, id, JobStatus::Completed).await;
    assert_eq!(
        manager.get(id).unwrap().result,
        Some(json!({ "accepted": { "approved": true } }))
    );
}

/// A stalled subscriber must not slow the job down: with a tiny event
/// buffer and a reader that never drains, the job still completes, and
/// the reader later observes a gap it can recover from.
#[tokio::test]
async fn stalled_subscriber_does_not_block_execution() {
    let manager = JobManager::with_event_capacity(4);
    let (_, mut stalled) = manager.subscribe(EventFilter::all());

    let id = manager
        .spawn(
            CreateJob::new("frame_analysis", "Analyze clip").total_steps(64),
            |ctx| async move {
                for step in 1..=64u64 {
                    ctx.update_progress(step as f64 / 64.0, Some(step))?;
                }
                Ok(json!(null))
            },
        )
        .unwrap();

    // Nobody reads `stalled` while the job floods 60+ events through a
    // 4-slot ring; completion must not wait on the subscriber.
    wait_for_status(&manager, id, JobStatus::Completed).await;

    let mut saw_gap = false;
    while let Some(item) = stalled.next().await {
        match item {
            StreamItem::Gap { missed } => {
                assert!(missed > 0);
                saw_gap = true;
                // Recovery path: a fresh snapshot replaces the lost events.
                let snapshot = manager.list(&Default::default());
                assert_eq!(snapshot.len(), 1);
                assert_eq!(snapshot[0].status, JobStatus::Completed);
                break;
            }
            StreamItem::Event(_) => continue,
        }
    }
    assert!(saw_gap, "overflowing a 4-slot ring must surface a gap");
}

/// Every successful transition emits exactly one event for that job, in
/// commit order, to a subscriber connected at emission time.
#[tokio::test]
async fn one_event_per_transition() {
    let manager = JobManager::new();
    let (_, mut stream) = manager.subscribe(EventFilter::all());

    let id = manager
        .create(CreateJob::new("video_generate", "Generate"))
        .unwrap();
    manager.start(id).unwrap();
    manager.pause_for_input(id, json!({ "q": 1 })).unwrap();
    manager.resume_with_input(id, json!({ "a": 2 })).unwrap();
    manager
        .fail(id, JobFailure::new("decode_error", "bad input"))
        .unwrap();

    let mut kinds = Vec::new();
    for _ in 0..5 {
        match stream.next().await {
            Some(StreamItem::Event(event)) => kinds.push(event.kind),
            other => panic!("expected event, got {other:?}"),
        }
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::Created,
            EventKind::Started,
            EventKind::AwaitingInput,
            EventKind::Resumed,
            EventKind::Failed,
        ]
    );

    // The failed record holds the structured error and no result.
    let job = manager.get(id).unwrap();
    assert_eq!(job.error.as_ref().unwrap().kind, "decode_error");
    assert!(job.result.is_none());
}

/// Status-filtered subscription sees only terminal transitions.
#[tokio::test]
async fn filtered_subscription_sees_only_matching_events() {
    let manager = JobManager::new();
    let (_, mut stream) = manager.subscribe(EventFilter::for_statuses([
        JobStatus::Completed,
        JobStatus::Failed,
    ]));

    let a = manager.create(CreateJob::new("frame_analysis", "a")).unwrap();
    let b = manager.create(CreateJob::new("frame_analysis", "b")).unwrap();
    manager.start(a).unwrap();
    manager.start(b).unwrap();
    manager.update_progress(a, 0.5, None).unwrap();
    manager.complete(a, json!(1)).unwrap();
    manager
        .fail(b, JobFailure::new("decode_error", "boom"))
        .unwrap();

    match stream.next().await {
        Some(StreamItem::Event(event)) => {
            assert_eq!((event.job_id, event.kind), (a, EventKind::Completed));
        }
        other => panic!("expected completed event, got {other:?}"),
    }
    match stream.next().await {
        Some(StreamItem::Event(event)) => {
            assert_eq!((event.job_id, event.kind), (b, EventKind::Failed));
        }
        other => panic!("expected failed event, got {other:?}"),
    }
}

/// Concurrent executors hammering the manager: every job lands in exactly
/// one terminal state with result/error exclusivity intact.
#[tokio::test]
async fn concurrent_jobs_settle_consistently() {
    let manager = JobManager::new();
    let mut ids = Vec::new();
    for i in 0..32u64 {
        let id = manager
            .spawn(
                CreateJob::new("frame_analysis", format!("clip {i}")),
                move |ctx| async move {
                    ctx.update_progress(0.5, None)?;
                    tokio::time::sleep(Duration::from_millis(i % 7)).await;
                    if i % 5 == 0 {
                        Err(JobFailure::new("decode_error", "corrupt frame"))
                    } else {
                        Ok(json!({ "clip": i }))
                    }
                },
            )
            .unwrap();
        ids.push((i, id));
    }

    for (i, id) in ids {
        let expected = if i % 5 == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        wait_for_status(&manager, id, expected).await;
        let job = manager.get(id).unwrap();
        assert!(job.result.is_some() != job.error.is_some());
        assert!(job.completed_at.is_some());
    }
}
