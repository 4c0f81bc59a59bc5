// crates/core/src/lib.rs
//! darkroom-core: in-process coordination of long-running media jobs.
//!
//! Image/video analysis and generation calls take seconds to tens of
//! seconds; this crate lets them run without blocking the caller while any
//! number of observers watch live progress. Provides:
//!
//! - `JobStore` -- concurrency-safe table of job records
//! - `JobManager` -- lifecycle state machine, parent/child composition,
//!   pause-for-input, retention cleanup
//! - `EventBroker` -- ordered, bounded fan-out of lifecycle events
//! - `JobContext` -- the handle a work function drives its job through
//!
//! Everything is single-process and in-memory; durability and
//! cross-process coordination are out of scope.

pub mod broker;
pub mod error;
pub mod executor;
pub mod manager;
pub mod store;
pub mod types;

pub use broker::{EventBroker, EventFilter, EventStream, StreamItem, DEFAULT_EVENT_CAPACITY};
pub use error::{JobError, JobResult};
pub use executor::JobContext;
pub use manager::JobManager;
pub use store::JobStore;
pub use types::{
    CreateJob, EventKind, Job, JobEvent, JobFailure, JobFilter, JobId, JobStatus,
};
