// crates/core/src/error.rs
use thiserror::Error;

use crate::types::{JobFailure, JobId, JobStatus};

/// Errors returned by lifecycle manager operations.
///
/// Work-function failures never surface here; they are captured into the
/// job's `error` field as a [`crate::JobFailure`] and the job transitions
/// to `Failed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// No job with this id exists (never created, deleted, or cleaned up).
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The operation is not valid for the job's current status. The record
    /// is left unchanged.
    #[error("{op} not valid for job {id} in status {status:?}")]
    InvalidState {
        id: JobId,
        op: &'static str,
        status: JobStatus,
    },

    /// Cancel was requested on a job created with `cancelable = false`.
    #[error("job {0} is not cancelable")]
    NotCancelable(JobId),

    /// The job was cancelled while its work function was suspended waiting
    /// for input. Only observed through [`crate::JobContext::await_input`].
    #[error("job {0} was cancelled")]
    Cancelled(JobId),
}

/// Result type alias for lifecycle operations.
pub type JobResult<T> = Result<T, JobError>;

/// A lifecycle error encountered inside a work function (e.g. via
/// [`crate::JobContext::update_progress`] or [`crate::JobContext::await_input`])
/// is recorded as the job's structured failure. This conversion lets work
/// functions use `?` on manager operations while returning a [`JobFailure`].
impl From<JobError> for JobFailure {
    fn from(err: JobError) -> Self {
        let kind = match err {
            JobError::NotFound(_) => "not_found",
            JobError::InvalidState { .. } => "invalid_state",
            JobError::NotCancelable(_) => "not_cancelable",
            JobError::Cancelled(_) => "cancelled",
        };
        JobFailure::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(JobError::NotFound(3).to_string(), "job not found: 3");
        assert_eq!(
            JobError::NotCancelable(9).to_string(),
            "job 9 is not cancelable"
        );
        let err = JobError::InvalidState {
            id: 4,
            op: "update_progress",
            status: JobStatus::Queued,
        };
        assert_eq!(
            err.to_string(),
            "update_progress not valid for job 4 in status Queued"
        );
    }
}
