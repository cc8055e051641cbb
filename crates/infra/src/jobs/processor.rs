//! Reference consumer: runs registered handlers against queued jobs.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use lumen_core::{Job, JobStatus, JobType, Parameters, StatusUpdate};

use super::dispatcher::Dispatcher;
use super::registry::UpdateOutcome;
use super::JobError;
use crate::queue::ConsumerHandle;
use crate::store::KeyValueStore;

/// Job handler function type. `Err` carries the message stored on the
/// failed result.
pub type JobHandler = Box<dyn Fn(&Job) -> Result<Parameters, String> + Send + Sync>;

/// What happened to one consumed job.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed,
    Failed(String),
    /// The job could not be claimed (already cancelled, finished, or expired).
    Skipped(Option<JobStatus>),
}

/// Processor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProcessorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
}

/// Runs one handler per job type, each on its own consumer thread.
pub struct JobProcessor<S> {
    dispatcher: Dispatcher<S>,
    handlers: HashMap<JobType, JobHandler>,
    stats: Arc<Mutex<ProcessorStats>>,
}

impl<S: KeyValueStore + Clone + 'static> JobProcessor<S> {
    pub fn new(dispatcher: Dispatcher<S>) -> Self {
        Self {
            dispatcher,
            handlers: HashMap::new(),
            stats: Arc::new(Mutex::new(ProcessorStats::default())),
        }
    }

    /// Register the handler for `job_type`, replacing any previous one.
    pub fn register_handler<F>(&mut self, job_type: JobType, handler: F)
    where
        F: Fn(&Job) -> Result<Parameters, String> + Send + Sync + 'static,
    {
        self.handlers.insert(job_type, Box::new(handler));
    }

    pub fn handles(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Claim, run and record one job.
    ///
    /// The job is only run if it can move to processing; a job cancelled
    /// while queued is skipped.
    pub fn process(&self, job: &Job) -> Result<ProcessOutcome, JobError> {
        let outcome = self.run(job);
        self.record(&outcome);
        outcome
    }

    fn run(&self, job: &Job) -> Result<ProcessOutcome, JobError> {
        match self.dispatcher.update_status(job.id, &StatusUpdate::processing())? {
            UpdateOutcome::Applied(_) => {}
            UpdateOutcome::Ignored { current, .. } => {
                info!(job_id = %job.id, status = %current, "skipping job that cannot be claimed");
                return Ok(ProcessOutcome::Skipped(Some(current)));
            }
            UpdateOutcome::Expired => return Ok(ProcessOutcome::Skipped(None)),
        }

        debug!(job_id = %job.id, job_type = %job.job_type, "job claimed");

        let update = match self.handlers.get(&job.job_type) {
            Some(handler) => match handler(job) {
                Ok(output) => StatusUpdate::completed(output),
                Err(message) => StatusUpdate::failed(message),
            },
            None => StatusUpdate::failed(format!("no handler for job type {}", job.job_type)),
        };

        let outcome = match &update.error_message {
            Some(message) => {
                warn!(job_id = %job.id, error = %message, "job failed");
                ProcessOutcome::Failed(message.clone())
            }
            None => ProcessOutcome::Completed,
        };

        // A cancel that landed while the handler ran wins; the result is dropped.
        if let UpdateOutcome::Ignored { current, .. } = self.dispatcher.update_status(job.id, &update)? {
            return Ok(ProcessOutcome::Skipped(Some(current)));
        }

        Ok(outcome)
    }

    fn record(&self, outcome: &Result<ProcessOutcome, JobError>) {
        let Ok(mut s) = self.stats.lock() else {
            return;
        };
        s.jobs_processed += 1;
        match outcome {
            Ok(ProcessOutcome::Completed) => s.jobs_succeeded += 1,
            Ok(ProcessOutcome::Failed(_)) | Err(_) => s.jobs_failed += 1,
            Ok(ProcessOutcome::Skipped(_)) => s.jobs_skipped += 1,
        }
    }

    /// Start one consumer per handled job type, draining its lanes in
    /// priority order.
    pub fn spawn(self) -> io::Result<ProcessorHandle> {
        let router = self.dispatcher.router().clone();
        let queues = self.dispatcher.queues().clone();
        let mut job_types: Vec<JobType> = self.handlers.keys().copied().collect();
        job_types.sort_by_key(|t| t.as_str());

        let stats = self.stats.clone();
        let processor = Arc::new(self);
        let mut consumers = Vec::with_capacity(job_types.len());

        for job_type in job_types {
            let worker = processor.clone();
            let spawned = queues.spawn_consumer(
                format!("job-processor:{job_type}"),
                router.lanes(job_type),
                move |job: Job| worker.process(&job).map(|_| ()),
            );

            match spawned {
                Ok(handle) => consumers.push(handle),
                Err(e) => {
                    ProcessorHandle { consumers, stats }.shutdown();
                    return Err(e);
                }
            }
        }

        info!(consumers = consumers.len(), "job processor started");
        Ok(ProcessorHandle { consumers, stats })
    }
}

/// Handle to a running [`JobProcessor`].
#[derive(Debug)]
pub struct ProcessorHandle {
    consumers: Vec<ConsumerHandle>,
    stats: Arc<Mutex<ProcessorStats>>,
}

impl ProcessorHandle {
    /// Names of the running consumer threads.
    pub fn consumers(&self) -> Vec<&str> {
        self.consumers.iter().map(ConsumerHandle::name).collect()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Stop every consumer and wait for them. All are signalled before the
    /// first join, so this takes about one poll interval in total.
    pub fn shutdown(self) {
        for consumer in &self.consumers {
            consumer.request_shutdown();
        }
        for consumer in self.consumers {
            consumer.shutdown();
        }
        info!("job processor stopped");
    }
}
