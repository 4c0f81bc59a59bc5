// crates/core/src/broker.rs
//! Publish/subscribe fan-out of lifecycle events.
//!
//! Built on `tokio::sync::broadcast`: each subscriber gets an independent
//! bounded ring of pending events. Publishing never blocks; a subscriber
//! that falls behind loses its oldest buffered events and sees an explicit
//! [`StreamItem::Gap`] telling it to re-fetch a snapshot.

use std::collections::HashSet;

use tokio::sync::broadcast;

use crate::types::{Job, JobEvent, JobId, JobStatus};

/// Default per-subscriber event buffer size.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Subscribe-time filter. An empty filter matches everything; populated
/// fields narrow delivery so heavily observed processes don't fan every
/// event out to every stream.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub job_ids: Option<HashSet<JobId>>,
    pub statuses: Option<HashSet<JobStatus>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_jobs(ids: impl IntoIterator<Item = JobId>) -> Self {
        Self {
            job_ids: Some(ids.into_iter().collect()),
            statuses: None,
        }
    }

    pub fn for_statuses(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        Self {
            job_ids: None,
            statuses: Some(statuses.into_iter().collect()),
        }
    }

    pub fn matches_job(&self, job: &Job) -> bool {
        self.job_ids.as_ref().is_none_or(|ids| ids.contains(&job.id))
            && self
                .statuses
                .as_ref()
                .is_none_or(|s| s.contains(&job.status))
    }

    pub fn matches(&self, event: &JobEvent) -> bool {
        self.matches_job(&event.job)
    }
}

/// Broadcast hub for committed lifecycle transitions.
pub struct EventBroker {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget: a send error only means nobody is listening.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// What a subscriber pulls off its stream.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// A lifecycle event, delivered in commit order.
    Event(JobEvent),
    /// This subscriber fell behind and its oldest `missed` buffered events
    /// were dropped. Re-fetch a snapshot to resynchronize.
    Gap { missed: u64 },
}

/// One subscriber's ordered view of the event stream.
pub struct EventStream {
    rx: broadcast::Receiver<JobEvent>,
    filter: EventFilter,
}

impl EventStream {
    /// Next item, skipping events the filter excludes. Returns `None` once
    /// the broker is gone and the backlog is drained.
    pub async fn next(&mut self) -> Option<StreamItem> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => {
                    return Some(StreamItem::Event(event))
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Some(StreamItem::Gap { missed })
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}
