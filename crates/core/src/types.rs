// crates/core/src/types.rs
//! Types for the job lifecycle core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a job.
pub type JobId = u64;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    AwaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Structured failure payload recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    /// Machine-readable failure kind (e.g. "decode_error", "upstream_timeout").
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl JobFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(
        kind: impl Into<String>,
        message: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            context: Some(context),
        }
    }
}

/// One unit of trackable, asynchronously executed work.
///
/// Records are owned by the `JobStore`; everything handed out of the store
/// is a point-in-time clone, so holding a `Job` never aliases live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Kind of work this job performs (open set, e.g. "frame_analysis",
    /// "video_generate").
    pub job_type: String,
    pub status: JobStatus,
    pub title: String,
    pub description: String,
    /// Completion fraction in `[0.0, 1.0]`, non-decreasing while running.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u64>,
    /// Fixed at creation; `current_step` never exceeds it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Success payload, present iff the job completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure payload, present iff the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub cancelable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    /// Append-only; a parent never loses a child reference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<JobId>,
    /// Payload published when the job paused for external input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting_data: Option<serde_json::Value>,
    /// Input supplied by the external actor that resumed the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_input: Option<serde_json::Value>,
    /// Whether the job's own work function ever reported progress. While
    /// false, a parent's progress is derived from its children.
    #[serde(default)]
    pub progress_overridden: bool,
}

/// Parameters for creating a job.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub job_type: String,
    pub title: String,
    pub description: String,
    pub total_steps: Option<u64>,
    pub cancelable: bool,
    pub parent_id: Option<JobId>,
}

impl CreateJob {
    pub fn new(job_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            title: title.into(),
            description: String::new(),
            total_steps: None,
            cancelable: true,
            parent_id: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn total_steps(mut self, total: u64) -> Self {
        self.total_steps = Some(total);
        self
    }

    pub fn cancelable(mut self, cancelable: bool) -> Self {
        self.cancelable = cancelable;
        self
    }

    pub fn parent(mut self, parent_id: JobId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub parent_id: Option<JobId>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.parent_id.is_none_or(|p| job.parent_id == Some(p))
    }
}

/// Kind of lifecycle transition an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Started,
    Progress,
    AwaitingInput,
    Resumed,
    Completed,
    Failed,
    Cancelled,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Started => "started",
            EventKind::Progress => "progress",
            EventKind::AwaitingInput => "awaiting_input",
            EventKind::Resumed => "resumed",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Cancelled => "cancelled",
        }
    }
}

/// A committed lifecycle transition, broadcast to subscribers.
///
/// Carries the full post-transition record so observers never need a
/// follow-up fetch to know the job's current shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub job: Job,
}
