// crates/core/src/manager.rs
//! Central lifecycle manager: owns the store, enforces the state machine,
//! and publishes one event per committed transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::broker::{EventBroker, EventFilter, EventStream, DEFAULT_EVENT_CAPACITY};
use crate::error::{JobError, JobResult};
use crate::store::JobStore;
use crate::types::{
    CreateJob, EventKind, Job, JobEvent, JobFailure, JobFilter, JobId, JobStatus,
};

/// Per-job runtime state that never appears in snapshots: the cancellation
/// token handed to the work function and, while the job is awaiting input,
/// the channel that resumes it.
struct JobRuntime {
    cancel: CancellationToken,
    resume_tx: Option<oneshot::Sender<serde_json::Value>>,
}

/// Coordinates every job's lifecycle. Constructed once at process start
/// and shared as `Arc<JobManager>` with every component that creates,
/// drives, or observes jobs.
///
/// All transition operations are synchronous and fail fast; none of them
/// ever waits on a work function or a subscriber.
pub struct JobManager {
    store: JobStore,
    broker: EventBroker,
    next_id: AtomicU64,
    runtime: Mutex<HashMap<JobId, JobRuntime>>,
    // Serializes transition commit + event publication so subscribers see
    // events in commit order. Never held across an await point.
    commit: Mutex<()>,
}

impl JobManager {
    pub fn new() -> Arc<Self> {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// `capacity` bounds each subscriber's pending-event ring.
    pub fn with_event_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            store: JobStore::new(),
            broker: EventBroker::new(capacity),
            next_id: AtomicU64::new(1),
            runtime: Mutex::new(HashMap::new()),
            commit: Mutex::new(()),
        })
    }

    /// Create a job in `Queued` status and return its id.
    ///
    /// A `parent_id` must reference an existing, non-terminal job; the
    /// child is appended to the parent's `child_ids`.
    pub fn create(&self, spec: CreateJob) -> JobResult<JobId> {
        let _guard = self.lock_commit();

        if let Some(parent_id) = spec.parent_id {
            let parent = self
                .store
                .get(parent_id)
                .ok_or(JobError::NotFound(parent_id))?;
            if parent.status.is_terminal() {
                return Err(JobError::InvalidState {
                    id: parent_id,
                    op: "create_child",
                    status: parent.status,
                });
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            id,
            job_type: spec.job_type,
            status: JobStatus::Queued,
            title: spec.title,
            description: spec.description,
            progress: 0.0,
            current_step: None,
            total_steps: spec.total_steps,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            cancelable: spec.cancelable,
            parent_id: spec.parent_id,
            child_ids: Vec::new(),
            awaiting_data: None,
            user_input: None,
            progress_overridden: false,
        };
        self.store.insert(job.clone());

        if let Some(parent_id) = spec.parent_id {
            // Parent existence was checked above under the same guard.
            let _ = self.store.update(parent_id, |parent| {
                parent.child_ids.push(id);
                Ok(())
            });
        }

        self.with_runtime(|rt| {
            rt.insert(
                id,
                JobRuntime {
                    cancel: CancellationToken::new(),
                    resume_tx: None,
                },
            );
        });

        self.broker.publish(Self::event(EventKind::Created, job));
        Ok(id)
    }

    /// `Queued -> Running`; stamps `started_at`.
    pub fn start(&self, id: JobId) -> JobResult<Job> {
        let _guard = self.lock_commit();
        let job = self.store.update(id, |job| {
            if job.status != JobStatus::Queued {
                return Err(invalid(job, "start"));
            }
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            Ok(job.clone())
        })?;
        self.broker
            .publish(Self::event(EventKind::Started, job.clone()));
        Ok(job)
    }

    /// Report progress on a running job.
    ///
    /// The fraction is clamped to `[0.0, 1.0]` and never moves backwards;
    /// `step` is capped at `total_steps` when one was fixed at creation.
    pub fn update_progress(
        &self,
        id: JobId,
        progress: f64,
        step: Option<u64>,
    ) -> JobResult<Job> {
        let _guard = self.lock_commit();
        let job = self.store.update(id, |job| {
            if job.status != JobStatus::Running {
                return Err(invalid(job, "update_progress"));
            }
            let clamped = progress.clamp(0.0, 1.0);
            job.progress = job.progress.max(clamped);
            if let Some(step) = step {
                job.current_step = Some(match job.total_steps {
                    Some(total) => step.min(total),
                    None => step,
                });
            }
            job.progress_overridden = true;
            Ok(job.clone())
        })?;
        self.broker
            .publish(Self::event(EventKind::Progress, job.clone()));
        Ok(job)
    }

    /// `Running -> AwaitingInput`; stores the payload the external actor
    /// needs to make its decision and returns the channel that will carry
    /// the decision back.
    ///
    /// The receiver resolves when [`JobManager::resume_with_input`] is
    /// called, or errors if the job is cancelled while paused. Work
    /// functions normally go through [`crate::JobContext::await_input`]
    /// instead of calling this directly.
    pub fn pause_for_input(
        &self,
        id: JobId,
        data: serde_json::Value,
    ) -> JobResult<oneshot::Receiver<serde_json::Value>> {
        let _guard = self.lock_commit();
        let job = self.store.update(id, |job| {
            if job.status != JobStatus::Running {
                return Err(invalid(job, "pause_for_input"));
            }
            job.status = JobStatus::AwaitingInput;
            job.awaiting_data = Some(data);
            Ok(job.clone())
        })?;
        let (tx, rx) = oneshot::channel();
        self.with_runtime(|rt| {
            if let Some(entry) = rt.get_mut(&id) {
                entry.resume_tx = Some(tx);
            }
        });
        self.broker
            .publish(Self::event(EventKind::AwaitingInput, job));
        Ok(rx)
    }

    /// `AwaitingInput -> Running`; records the supplied input, clears
    /// `awaiting_data`, and wakes the suspended work function.
    ///
    /// Callable from any execution context; the original worker need not
    /// exist anymore; re-entry runs on whatever worker polls the task next.
    pub fn resume_with_input(&self, id: JobId, input: serde_json::Value) -> JobResult<Job> {
        let _guard = self.lock_commit();
        let job = self.store.update(id, |job| {
            if job.status != JobStatus::AwaitingInput {
                return Err(invalid(job, "resume_with_input"));
            }
            job.status = JobStatus::Running;
            job.user_input = Some(input.clone());
            job.awaiting_data = None;
            Ok(job.clone())
        })?;
        let tx = self.with_runtime(|rt| rt.get_mut(&id).and_then(|entry| entry.resume_tx.take()));
        match tx {
            Some(tx) => {
                if tx.send(input).is_err() {
                    tracing::warn!(job_id = id, "resume waiter gone before input delivery");
                }
            }
            None => tracing::warn!(job_id = id, "no resume waiter registered"),
        }
        self.broker
            .publish(Self::event(EventKind::Resumed, job.clone()));
        Ok(job)
    }

    /// `Running -> Completed`; stores the result, stamps `completed_at`,
    /// and freezes progress at 1.0.
    pub fn complete(&self, id: JobId, result: serde_json::Value) -> JobResult<Job> {
        let _guard = self.lock_commit();
        let mut events = Vec::new();
        let job = self.complete_locked(id, result, &mut events)?;
        self.publish_all(events);
        Ok(job)
    }

    /// `Running | Queued -> Failed`; stores the structured failure.
    pub fn fail(&self, id: JobId, failure: JobFailure) -> JobResult<Job> {
        let _guard = self.lock_commit();
        let mut events = Vec::new();
        let job = self.fail_locked(id, failure, &mut events)?;
        self.publish_all(events);
        Ok(job)
    }

    /// `Queued | Running | AwaitingInput -> Cancelled`.
    ///
    /// Signals the work function's cancellation token (cooperative: the
    /// manager stops waiting, it does not tear down in-flight external
    /// calls), wakes a paused waiter with a cancelled error, and cascades
    /// to all non-terminal cancelable children.
    pub fn cancel(&self, id: JobId) -> JobResult<Job> {
        let _guard = self.lock_commit();
        let mut events = Vec::new();
        let job = self.cancel_locked(id, &mut events)?;
        self.publish_all(events);
        Ok(job)
    }

    pub fn get(&self, id: JobId) -> JobResult<Job> {
        self.store.get(id).ok_or(JobError::NotFound(id))
    }

    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        self.store.list(filter)
    }

    /// Remove a terminal job's record. Running jobs must be cancelled (or
    /// allowed to finish) first.
    pub fn delete(&self, id: JobId) -> JobResult<Job> {
        let _guard = self.lock_commit();
        let job = self.store.get(id).ok_or(JobError::NotFound(id))?;
        if !job.status.is_terminal() {
            return Err(invalid(&job, "delete"));
        }
        self.store.remove(id);
        self.clear_runtime(id);
        Ok(job)
    }

    /// Remove terminal jobs whose `completed_at` is older than the
    /// retention window. Returns the number removed. Invoked by an
    /// external scheduler; the manager never sweeps on its own.
    pub fn cleanup(&self, retention: Duration) -> usize {
        let _guard = self.lock_commit();
        let retention =
            chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return 0;
        };
        let expired: Vec<JobId> = self
            .store
            .list(&JobFilter::default())
            .into_iter()
            .filter(|job| job.status.is_terminal())
            .filter(|job| job.completed_at.is_some_and(|at| at < cutoff))
            .map(|job| job.id)
            .collect();
        for id in &expired {
            self.store.remove(*id);
            self.clear_runtime(*id);
        }
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "removed expired terminal jobs");
        }
        expired.len()
    }

    /// Subscribe to lifecycle events, returning the current snapshot of
    /// matching jobs plus the live stream.
    ///
    /// Snapshot and stream are taken under the commit lock, so every
    /// transition is visible either in the snapshot or on the stream,
    /// never lost between the two.
    pub fn subscribe(&self, filter: EventFilter) -> (Vec<Job>, EventStream) {
        let _guard = self.lock_commit();
        let stream = self.broker.subscribe(filter.clone());
        let snapshot = self
            .store
            .list(&JobFilter::default())
            .into_iter()
            .filter(|job| filter.matches_job(job))
            .collect();
        (snapshot, stream)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broker.subscriber_count()
    }

    /// Cancellation token for a live (non-deleted) job.
    pub(crate) fn cancel_token(&self, id: JobId) -> Option<CancellationToken> {
        self.with_runtime(|rt| rt.get(&id).map(|entry| entry.cancel.clone()))
    }

    // ------------------------------------------------------------------
    // Internal transitions. All `_locked` functions run with the commit
    // guard held and append to `events` instead of publishing directly,
    // so a chain of transitions (child terminal -> parent aggregation)
    // goes out in commit order.
    // ------------------------------------------------------------------

    fn complete_locked(
        &self,
        id: JobId,
        result: serde_json::Value,
        events: &mut Vec<JobEvent>,
    ) -> JobResult<Job> {
        let job = self.store.update(id, |job| {
            if job.status != JobStatus::Running {
                return Err(invalid(job, "complete"));
            }
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
            job.progress = 1.0;
            Ok(job.clone())
        })?;
        self.clear_runtime(id);
        events.push(Self::event(EventKind::Completed, job.clone()));
        if let Some(parent_id) = job.parent_id {
            self.aggregate_locked(parent_id, events);
        }
        Ok(job)
    }

    fn fail_locked(
        &self,
        id: JobId,
        failure: JobFailure,
        events: &mut Vec<JobEvent>,
    ) -> JobResult<Job> {
        let job = self.store.update(id, |job| {
            if !matches!(job.status, JobStatus::Running | JobStatus::Queued) {
                return Err(invalid(job, "fail"));
            }
            job.status = JobStatus::Failed;
            job.error = Some(failure);
            job.completed_at = Some(Utc::now());
            Ok(job.clone())
        })?;
        self.clear_runtime(id);
        events.push(Self::event(EventKind::Failed, job.clone()));
        if let Some(parent_id) = job.parent_id {
            self.aggregate_locked(parent_id, events);
        }
        Ok(job)
    }

    fn cancel_locked(&self, id: JobId, events: &mut Vec<JobEvent>) -> JobResult<Job> {
        let current = self.store.get(id).ok_or(JobError::NotFound(id))?;
        if !current.cancelable {
            return Err(JobError::NotCancelable(id));
        }
        let job = self.store.update(id, |job| {
            if !matches!(
                job.status,
                JobStatus::Queued | JobStatus::Running | JobStatus::AwaitingInput
            ) {
                return Err(invalid(job, "cancel"));
            }
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
            Ok(job.clone())
        })?;
        // Signal the work function; dropping the runtime entry also drops
        // any pending resume sender, which wakes a paused waiter with a
        // cancelled error.
        if let Some(entry) = self.with_runtime(|rt| rt.remove(&id)) {
            entry.cancel.cancel();
        }
        events.push(Self::event(EventKind::Cancelled, job.clone()));

        for child_id in &job.child_ids {
            let Some(child) = self.store.get(*child_id) else {
                continue;
            };
            if child.status.is_terminal() {
                continue;
            }
            if !child.cancelable {
                tracing::warn!(
                    job_id = child_id,
                    parent_id = id,
                    "skipping cascade cancel of non-cancelable child"
                );
                continue;
            }
            if let Err(e) = self.cancel_locked(*child_id, events) {
                tracing::warn!(job_id = child_id, error = %e, "cascade cancel failed");
            }
        }

        if let Some(parent_id) = job.parent_id {
            self.aggregate_locked(parent_id, events);
        }
        Ok(job)
    }

    /// Recompute a parent's derived progress and finish it automatically
    /// once every child is terminal: `Completed` when all children
    /// completed, otherwise `Failed` with a summary error naming the
    /// children that did not complete.
    fn aggregate_locked(&self, parent_id: JobId, events: &mut Vec<JobEvent>) {
        let Some(parent) = self.store.get(parent_id) else {
            return;
        };
        if parent.status.is_terminal() {
            return;
        }
        let children: Vec<Job> = parent
            .child_ids
            .iter()
            .filter_map(|child_id| self.store.get(*child_id))
            .collect();
        if children.is_empty() {
            return;
        }
        let total = children.len();
        let completed = children
            .iter()
            .filter(|c| c.status == JobStatus::Completed)
            .count();
        let terminal = children.iter().filter(|c| c.status.is_terminal()).count();

        if !parent.progress_overridden {
            let derived = completed as f64 / total as f64;
            if (derived - parent.progress).abs() > f64::EPSILON {
                if let Ok(updated) = self.store.update(parent_id, |p| {
                    p.progress = derived;
                    Ok(p.clone())
                }) {
                    events.push(Self::event(EventKind::Progress, updated));
                }
            }
        }

        if terminal < total {
            return;
        }

        let unfinished: Vec<JobId> = children
            .iter()
            .filter(|c| c.status != JobStatus::Completed)
            .map(|c| c.id)
            .collect();
        let finished = self.store.update(parent_id, |p| {
            if p.status.is_terminal() {
                return Err(invalid(p, "aggregate"));
            }
            p.completed_at = Some(Utc::now());
            if unfinished.is_empty() {
                p.status = JobStatus::Completed;
                p.progress = 1.0;
                if p.result.is_none() {
                    p.result = Some(serde_json::json!({ "children": p.child_ids }));
                }
            } else {
                p.status = JobStatus::Failed;
                p.error = Some(JobFailure::with_context(
                    "child_failed",
                    format!("{} of {total} child jobs did not complete", unfinished.len()),
                    serde_json::json!({ "failedChildren": unfinished }),
                ));
            }
            Ok(p.clone())
        });
        if let Ok(parent) = finished {
            self.clear_runtime(parent_id);
            let kind = if parent.status == JobStatus::Completed {
                EventKind::Completed
            } else {
                EventKind::Failed
            };
            events.push(Self::event(kind, parent.clone()));
            if let Some(grandparent_id) = parent.parent_id {
                self.aggregate_locked(grandparent_id, events);
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn event(kind: EventKind, job: Job) -> JobEvent {
        JobEvent {
            job_id: job.id,
            kind,
            timestamp: Utc::now(),
            job,
        }
    }

    fn publish_all(&self, events: Vec<JobEvent>) {
        for event in events {
            self.broker.publish(event);
        }
    }

    fn lock_commit(&self) -> MutexGuard<'_, ()> {
        match self.commit.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("commit lock poisoned: {e}");
                e.into_inner()
            }
        }
    }

    fn with_runtime<T>(&self, f: impl FnOnce(&mut HashMap<JobId, JobRuntime>) -> T) -> T {
        let mut runtime = match self.runtime.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("runtime table lock poisoned: {e}");
                e.into_inner()
            }
        };
        f(&mut runtime)
    }

    fn clear_runtime(&self, id: JobId) {
        self.with_runtime(|rt| {
            rt.remove(&id);
        });
    }
}

fn invalid(job: &Job, op: &'static str) -> JobError {
    JobError::InvalidState {
        id: job.id,
        op,
        status: job.status,
    }
}
