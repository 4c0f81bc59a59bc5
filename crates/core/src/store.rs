// crates/core/src/store.rs
//! Concurrency-safe storage for job records.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{JobError, JobResult};
use crate::types::{Job, JobFilter, JobId};

/// The single source of truth for job records.
///
/// All mutations run under the write lock, so a reader never observes a
/// partially updated record. Lookups and listings return point-in-time
/// clones, never aliases into the table.
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, job: Job) {
        self.write().insert(job.id, job);
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.read().get(&id).cloned()
    }

    /// Snapshot of all records matching the filter, ordered by id.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .read()
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    pub fn remove(&self, id: JobId) -> Option<Job> {
        self.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Atomically read-modify-write one record. The closure runs under the
    /// write lock; callers validate before mutating so an `Err` leaves the
    /// record untouched.
    pub fn update<T>(&self, id: JobId, f: impl FnOnce(&mut Job) -> JobResult<T>) -> JobResult<T> {
        let mut jobs = self.write();
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        f(job)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("job table lock poisoned on read: {e}");
                e.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("job table lock poisoned on write: {e}");
                e.into_inner()
            }
        }
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn job(id: JobId, status: JobStatus, parent_id: Option<JobId>) -> Job {
        Job {
            id,
            job_type: "test".to_string(),
            status,
            title: format!("job {id}"),
            description: String::new(),
            progress: 0.0,
            current_step: None,
            total_steps: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            cancelable: true,
            parent_id,
            child_ids: Vec::new(),
            awaiting_data: None,
            user_input: None,
            progress_overridden: false,
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let store = JobStore::new();
        assert!(store.is_empty());
        store.insert(job(1, JobStatus::Queued, None));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1).unwrap().id, 1);
        assert!(store.get(2).is_none());
        assert!(store.remove(1).is_some());
        assert!(store.remove(1).is_none());
    }

    #[test]
    fn test_get_returns_detached_clone() {
        let store = JobStore::new();
        store.insert(job(1, JobStatus::Queued, None));
        let mut snapshot = store.get(1).unwrap();
        snapshot.child_ids.push(99);
        snapshot.status = JobStatus::Failed;
        // The store's record is unaffected by snapshot mutation.
        let fresh = store.get(1).unwrap();
        assert_eq!(fresh.status, JobStatus::Queued);
        assert!(fresh.child_ids.is_empty());
    }

    #[test]
    fn test_list_filters() {
        let store = JobStore::new();
        store.insert(job(1, JobStatus::Queued, None));
        store.insert(job(2, JobStatus::Running, Some(1)));
        store.insert(job(3, JobStatus::Running, Some(1)));
        store.insert(job(4, JobStatus::Completed, None));

        assert_eq!(store.list(&JobFilter::default()).len(), 4);

        let running = store.list(&JobFilter {
            status: Some(JobStatus::Running),
            parent_id: None,
        });
        assert_eq!(running.iter().map(|j| j.id).collect::<Vec<_>>(), vec![2, 3]);

        let children = store.list(&JobFilter {
            status: None,
            parent_id: Some(1),
        });
        assert_eq!(children.len(), 2);

        let both = store.list(&JobFilter {
            status: Some(JobStatus::Completed),
            parent_id: Some(1),
        });
        assert!(both.is_empty());
    }

    #[test]
    fn test_update_atomicity() {
        let store = JobStore::new();
        store.insert(job(1, JobStatus::Queued, None));

        let updated = store
            .update(1, |j| {
                j.status = JobStatus::Running;
                Ok(j.clone())
            })
            .unwrap();
        assert_eq!(updated.status, JobStatus::Running);
        assert_eq!(store.get(1).unwrap().status, JobStatus::Running);

        let err = store.update(42, |_| Ok(())).unwrap_err();
        assert_eq!(err, JobError::NotFound(42));
    }
}
