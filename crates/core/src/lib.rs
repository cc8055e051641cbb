//! `lumen-core`: job and cache domain building blocks.
//!
//! This crate contains **pure domain** primitives (no store or transport concerns).

pub mod error;
pub mod id;
pub mod job;
pub mod keys;
pub mod result;
pub mod status;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{Job, JobType, NewJob, Parameters};
pub use keys::{CacheKeys, JobKeys, notification_channel};
pub use result::{JobResult, StatusUpdate};
pub use status::JobStatus;
