//! Infrastructure layer: key-value store adapters, cache, queues, job orchestration.

pub mod cache;
pub mod config;
pub mod jobs;
pub mod queue;
pub mod store;


pub use cache::CacheService;
pub use config::{ConfigError, DuplicatePolicy, Settings};
pub use jobs::{Dispatcher, JobError, JobProcessor, JobRegistry, QueueRouter, UpdateOutcome};
pub use queue::{QueueError, QueueService};
pub use store::{InMemoryStore, KeyValueStore, StoreError, Subscription};
