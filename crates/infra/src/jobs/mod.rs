//! Job orchestration over the key-value store.
//!
//! ## Components
//!
//! - `JobRegistry`: owns the `job:<id>` / `job_result:<id>` records and every
//!   status transition
//! - `QueueRouter`: maps a job to the queue (and lane) it is consumed from
//! - `Dispatcher`: the single write path for new jobs; persists, then enqueues
//! - `JobProcessor`: reference consumer running one handler per job type

pub mod dispatcher;
pub mod processor;
pub mod registry;
pub mod routing;

use thiserror::Error;

use lumen_core::{DomainError, JobId};

use crate::queue::QueueError;
use crate::store::StoreError;

pub use dispatcher::Dispatcher;
pub use processor::{JobHandler, JobProcessor, ProcessOutcome, ProcessorHandle, ProcessorStats};
pub use registry::{JobRegistry, UpdateOutcome};
pub use routing::QueueRouter;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// No job and no result record exist for this id (never created, or expired).
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::Serialization(e.to_string())
    }
}

impl From<QueueError> for JobError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::StoreUnavailable(e) => JobError::StoreUnavailable(e),
            QueueError::Serialization(msg) => JobError::Serialization(msg),
        }
    }
}
