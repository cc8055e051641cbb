//! Job submission and status write path.

use tracing::{error, info, warn};

use lumen_core::{Job, JobId, JobResult, NewJob, StatusUpdate};

use super::registry::{JobRegistry, UpdateOutcome};
use super::routing::QueueRouter;
use super::JobError;
use crate::config::Settings;
use crate::queue::QueueService;
use crate::store::KeyValueStore;

/// Persists jobs and routes them to their queue.
///
/// Holds no mutable state; clone it (or share it behind an `Arc`) across
/// threads freely.
#[derive(Debug, Clone)]
pub struct Dispatcher<S> {
    registry: JobRegistry<S>,
    queues: QueueService<S>,
    router: QueueRouter,
}

impl<S: KeyValueStore + Clone> Dispatcher<S> {
    pub fn new(store: S) -> Self {
        Self::from_settings(store, &Settings::default())
    }

    pub fn from_settings(store: S, settings: &Settings) -> Self {
        Self {
            registry: JobRegistry::from_settings(store.clone(), settings),
            queues: QueueService::from_settings(store, settings),
            router: QueueRouter::from_settings(settings),
        }
    }

    /// Assemble a dispatcher from parts sharing one store.
    pub fn from_parts(registry: JobRegistry<S>, queues: QueueService<S>, router: QueueRouter) -> Self {
        Self {
            registry,
            queues,
            router,
        }
    }

    pub fn registry(&self) -> &JobRegistry<S> {
        &self.registry
    }

    pub fn queues(&self) -> &QueueService<S> {
        &self.queues
    }

    pub fn router(&self) -> &QueueRouter {
        &self.router
    }

    /// Persist `job` with a pending result and enqueue it. Returns the queue
    /// it was published to.
    ///
    /// If the enqueue fails and this call created the job, both records are
    /// deleted again so the same job can be resubmitted. An upsert over an
    /// existing job keeps its (now pending) records.
    pub fn submit(&self, job: &Job) -> Result<String, JobError> {
        let created = self.registry.register(job)?;

        let queue = self.router.route(job);
        if let Err(e) = self.queues.publish(&queue, job) {
            if created {
                error!(job_id = %job.id, queue = %queue, error = %e, "enqueue failed, rolling back");
                if let Err(rollback) = self.registry.remove(job.id) {
                    error!(job_id = %job.id, error = %rollback, "rollback failed");
                }
            } else {
                warn!(job_id = %job.id, queue = %queue, error = %e, "enqueue failed, keeping existing job records");
            }
            return Err(e.into());
        }

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            queue = %queue,
            priority = job.priority,
            "job submitted"
        );
        Ok(queue)
    }

    /// Build a job from `input`, submit it and return its id.
    pub fn submit_new(&self, input: NewJob) -> Result<JobId, JobError> {
        let job = Job::new(input)?;
        self.submit(&job)?;
        Ok(job.id)
    }

    pub fn get_result(&self, id: JobId) -> Result<JobResult, JobError> {
        self.registry.get_result(id)
    }

    /// Status callback used by consumers.
    pub fn update_status(&self, id: JobId, update: &StatusUpdate) -> Result<UpdateOutcome, JobError> {
        self.registry.update_status(id, update)
    }

    /// Cancel a pending or processing job. Terminal jobs are left as they are.
    pub fn cancel(&self, id: JobId) -> Result<UpdateOutcome, JobError> {
        let outcome = self.registry.cancel(id)?;
        if outcome.is_applied() {
            info!(job_id = %id, "job cancelled");
        }
        Ok(outcome)
    }

    /// Round-trip to the store.
    pub fn health(&self) -> Result<(), JobError> {
        Ok(self.registry.store().ping()?)
    }
}
