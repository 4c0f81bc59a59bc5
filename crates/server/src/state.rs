// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use darkroom_core::JobManager;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// The job lifecycle manager, shared with whatever executors the
    /// embedding application wires up.
    pub jobs: Arc<JobManager>,
}

impl AppState {
    /// Create a new application state with a fresh manager.
    pub fn new() -> Arc<Self> {
        Self::with_manager(JobManager::new())
    }

    /// Create with an externally-provided manager (the binary shares it
    /// with the cleanup sweeper; tests inject their own).
    pub fn with_manager(jobs: Arc<JobManager>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            jobs,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_new() {
        let state = AppState::new();
        assert!(state.uptime_secs() < 1);
        assert_eq!(state.jobs.subscriber_count(), 0);
    }

    #[test]
    fn test_app_state_shares_manager() {
        let manager = JobManager::new();
        let state = AppState::with_manager(manager.clone());
        let id = manager
            .create(darkroom_core::CreateJob::new("frame_analysis", "clip"))
            .unwrap();
        assert!(state.jobs.get(id).is_ok());
    }
}
