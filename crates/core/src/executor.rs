// crates/core/src/executor.rs
//! Binding between a job and the work function that performs it.
//!
//! A unit of work is an async closure receiving a [`JobContext`]. The
//! context wraps progress reporting, cooperative cancellation, and the
//! pause-for-input protocol; the closure returns its result payload or a
//! structured failure, which the manager records as the job's terminal
//! state. Scheduling is the runtime's job; the manager only hands the
//! future to `tokio::spawn`.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{JobError, JobResult};
use crate::manager::JobManager;
use crate::types::{CreateJob, JobFailure, JobId};

/// Handle passed into a work function.
///
/// Cheap to clone; every method may be called from whichever worker is
/// currently polling the job's future.
#[derive(Clone)]
pub struct JobContext {
    manager: Arc<JobManager>,
    id: JobId,
    cancel: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(manager: Arc<JobManager>, id: JobId, cancel: CancellationToken) -> Self {
        Self {
            manager,
            id,
            cancel,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Report progress for the running job.
    pub fn update_progress(&self, progress: f64, step: Option<u64>) -> JobResult<()> {
        self.manager.update_progress(self.id, progress, step)?;
        Ok(())
    }

    /// Whether cancellation has been requested. Work functions poll this
    /// (or await [`JobContext::cancelled`]) at safe points.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the job is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Pause the job for an external decision.
    ///
    /// Transitions the job to `AwaitingInput` with `data` as the payload
    /// observers see, then suspends until `resume_with_input` supplies the
    /// decision. Suspension frees the worker (this is an await, not a
    /// blocked thread) and resumption may happen from any context. Returns
    /// [`JobError::Cancelled`] if the job is cancelled while paused.
    pub async fn await_input(&self, data: serde_json::Value) -> JobResult<serde_json::Value> {
        let rx = self.manager.pause_for_input(self.id, data)?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(JobError::Cancelled(self.id)),
            input = rx => input.map_err(|_| JobError::Cancelled(self.id)),
        }
    }
}

impl JobManager {
    /// Create a job and hand its work function to the async scheduler.
    ///
    /// The job is created `Queued` and started by the spawned task, so the
    /// id returns to the caller before any work runs. The work future is
    /// raced against the job's cancellation token: on cancel the manager
    /// stops waiting on it (in-flight external calls are not torn down;
    /// cancellation is cooperative).
    pub fn spawn<F, Fut>(self: &Arc<Self>, spec: CreateJob, work: F) -> JobResult<JobId>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value, JobFailure>> + Send + 'static,
    {
        let id = self.create(spec)?;
        let cancel = self.cancel_token(id).unwrap_or_default();
        let ctx = JobContext::new(Arc::clone(self), id, cancel.clone());
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.start(id) {
                // Cancelled between create and the task being scheduled.
                tracing::debug!(job_id = id, error = %e, "job no longer startable");
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(job_id = id, "work abandoned after cancellation");
                }
                output = work(ctx) => match output {
                    Ok(result) => {
                        if let Err(e) = manager.complete(id, result) {
                            tracing::debug!(job_id = id, error = %e, "completion discarded");
                        }
                    }
                    Err(failure) => {
                        if let Err(e) = manager.fail(id, failure) {
                            tracing::debug!(job_id = id, error = %e, "failure discarded");
                        }
                    }
                }
            }
        });
        Ok(id)
    }
}
