// crates/server/src/routes/jobs.rs
//! API routes for observing and driving jobs.
//!
//! - `GET    /api/jobs`             -- List jobs (status/parent filters)
//! - `GET    /api/jobs/stream`      -- SSE stream of lifecycle events
//! - `GET    /api/jobs/{id}`        -- Get a single job
//! - `DELETE /api/jobs/{id}`        -- Delete a terminal job
//! - `POST   /api/jobs/{id}/cancel` -- Request cooperative cancellation
//! - `POST   /api/jobs/{id}/input`  -- Resume a job paused for input
//!
//! Job creation is not exposed here: work functions are wired up by the
//! embedding application through `JobManager::spawn`.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use darkroom_core::{EventFilter, Job, JobFilter, JobId, JobStatus, StreamItem};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Query parameters for the list endpoint.
#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<JobStatus>,
    parent: Option<JobId>,
}

/// GET /api/jobs -- List jobs, optionally filtered by status and parent.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Job>> {
    let filter = JobFilter {
        status: query.status,
        parent_id: query.parent,
    };
    Json(state.jobs.list(&filter))
}

/// GET /api/jobs/{id} -- Get a single job snapshot.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.get(id)?))
}

/// POST /api/jobs/{id}/cancel -- Request cooperative cancellation.
///
/// Returns the cancelled snapshot; 409 if the job is not cancelable or
/// already terminal.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.cancel(id)?))
}

/// Body for the resume endpoint.
#[derive(Debug, Deserialize)]
struct ResumeBody {
    input: serde_json::Value,
}

/// POST /api/jobs/{id}/input -- Supply the decision a paused job waits on.
async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
    Json(body): Json<ResumeBody>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.resume_with_input(id, body.input)?))
}

/// DELETE /api/jobs/{id} -- Remove a terminal job's record.
async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<StatusCode> {
    state.jobs.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters for the SSE stream.
#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    /// Comma-separated job ids to watch.
    jobs: Option<String>,
    /// Comma-separated statuses to watch.
    status: Option<String>,
}

fn parse_status(raw: &str) -> Option<JobStatus> {
    match raw {
        "queued" => Some(JobStatus::Queued),
        "running" => Some(JobStatus::Running),
        "awaiting_input" => Some(JobStatus::AwaitingInput),
        "completed" => Some(JobStatus::Completed),
        "failed" => Some(JobStatus::Failed),
        "cancelled" => Some(JobStatus::Cancelled),
        _ => None,
    }
}

fn parse_filter(query: &StreamQuery) -> Result<EventFilter, ApiError> {
    let mut filter = EventFilter::all();
    if let Some(raw) = &query.jobs {
        let ids = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<JobId>()
                    .map_err(|_| ApiError::BadRequest(format!("invalid job id list: {raw}")))
            })
            .collect::<Result<HashSet<_>, _>>()?;
        filter.job_ids = Some(ids);
    }
    if let Some(raw) = &query.status {
        let statuses = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                parse_status(s)
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {s}")))
            })
            .collect::<Result<HashSet<_>, _>>()?;
        filter.statuses = Some(statuses);
    }
    Ok(filter)
}

/// GET /api/jobs/stream -- SSE stream of job lifecycle events.
///
/// # Events
///
/// | Event name                      | When emitted                         |
/// |---------------------------------|--------------------------------------|
/// | `snapshot`                      | On connect, and when a client lags   |
/// | `created` … `cancelled`         | One per committed transition         |
/// | `heartbeat`                     | Every 15 seconds to keep connection  |
///
/// On connection the server sends a `snapshot` event per matching job so
/// the client hydrates without a separate REST call; a client that falls
/// behind the bounded event buffer gets the same full snapshot again
/// instead of silently missing transitions.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let filter = parse_filter(&query)?;
    let jobs = state.jobs.clone();

    let stream = async_stream::stream! {
        // 1. On connect: snapshot of all matching jobs, then live events.
        let (snapshot, mut events) = jobs.subscribe(filter.clone());
        for job in snapshot {
            yield Ok(Event::default()
                .event("snapshot")
                .data(serde_json::to_string(&job).unwrap_or_default()));
        }

        let mut heartbeat_interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            tokio::select! {
                item = events.next() => {
                    match item {
                        Some(StreamItem::Event(event)) => {
                            yield Ok(Event::default()
                                .event(event.kind.as_str())
                                .data(serde_json::to_string(&event).unwrap_or_default()));
                        }
                        Some(StreamItem::Gap { missed }) => {
                            tracing::warn!(
                                missed,
                                "SSE client lagged, re-sending snapshot"
                            );
                            let jobs_now = jobs.list(&JobFilter::default());
                            for job in jobs_now.iter().filter(|j| filter.matches_job(j)) {
                                yield Ok(Event::default()
                                    .event("snapshot")
                                    .data(serde_json::to_string(job).unwrap_or_default()));
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat_interval.tick() => {
                    yield Ok(Event::default().event("heartbeat").data("{}"));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/stream", get(stream_jobs))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/input", post(resume_job))
}
