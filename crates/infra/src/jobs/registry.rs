//! Job and job-result records.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use lumen_core::{Job, JobId, JobKeys, JobResult, JobStatus, NewJob, StatusUpdate};

use super::JobError;
use crate::config::{DuplicatePolicy, Settings};
use crate::store::{KeyValueStore, Subscription};

/// What `update_status` did with a requested change.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The transition was written (and announced on the result channel).
    Applied(JobResult),
    /// The lifecycle does not allow the transition; nothing was written.
    Ignored {
        current: JobStatus,
        requested: JobStatus,
    },
    /// Neither the job nor its result exists any more; nothing was written.
    Expired,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }
}

/// Owner of the `job:<id>` and `job_result:<id>` records.
///
/// Every status change goes through [`JobRegistry::update_status`], which
/// enforces the lifecycle. Two transitions are committed by a single SET NX
/// so concurrent writers cannot both win them:
///
/// - `job_result:<id>:claim` is taken by the one update that moves the job
///   to processing;
/// - `job_result:<id>:final` stores the first terminal result, and
///   [`JobRegistry::get_result`] prefers it over the plain result record.
///
/// Writers that lose either race get [`UpdateOutcome::Ignored`].
#[derive(Debug, Clone)]
pub struct JobRegistry<S> {
    store: S,
    job_ttl: Duration,
    result_ttl: Duration,
    duplicate_policy: DuplicatePolicy,
}

impl<S: KeyValueStore> JobRegistry<S> {
    pub fn new(store: S) -> Self {
        Self::from_settings(store, &Settings::default())
    }

    pub fn from_settings(store: S, settings: &Settings) -> Self {
        Self {
            store,
            job_ttl: settings.job_ttl,
            result_ttl: settings.result_ttl,
            duplicate_policy: settings.duplicate_policy,
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl = ttl;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    /// Build a job from `input` and persist it with a pending result.
    pub fn create_job(&self, input: NewJob) -> Result<Job, JobError> {
        let job = Job::new(input)?;
        self.register(&job)?;
        Ok(job)
    }

    /// Persist `job` and its initial pending result. Returns whether the job
    /// record is new (`false` when [`DuplicatePolicy::Upsert`] replaced one).
    ///
    /// Under [`DuplicatePolicy::Reject`] the job record is written with SET NX,
    /// so a second submission of the same id fails with
    /// [`JobError::DuplicateJob`] and leaves the first one untouched.
    pub fn register(&self, job: &Job) -> Result<bool, JobError> {
        let key = JobKeys::job(job.id);
        let payload = serde_json::to_vec(job)?;

        let created = match self.duplicate_policy {
            DuplicatePolicy::Reject => {
                if !self.store.set_if_absent(&key, &payload, Some(self.job_ttl))? {
                    warn!(job_id = %job.id, "duplicate job submission rejected");
                    return Err(JobError::DuplicateJob(job.id));
                }
                true
            }
            DuplicatePolicy::Upsert => {
                let existed = self.store.exists(&key)?;
                self.store.set(&key, &payload, Some(self.job_ttl))?;
                !existed
            }
        };

        self.clear_markers(job.id)?;
        self.write_result(&JobResult::pending(job.id))?;
        debug!(job_id = %job.id, job_type = %job.job_type, created, "job registered");
        Ok(created)
    }

    pub fn get_job(&self, id: JobId) -> Result<Job, JobError> {
        let bytes = self
            .store
            .get(&JobKeys::job(id))?
            .ok_or(JobError::NotFound(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Current result of job `id`.
    ///
    /// A job whose result record is gone while the job record remains reads
    /// as pending. With both records gone the answer is
    /// [`JobError::NotFound`].
    pub fn get_result(&self, id: JobId) -> Result<JobResult, JobError> {
        if let Some(bytes) = self.store.get(&JobKeys::final_result(id))? {
            return Ok(serde_json::from_slice(&bytes)?);
        }

        if let Some(bytes) = self.store.get(&JobKeys::result(id))? {
            return Ok(serde_json::from_slice(&bytes)?);
        }

        if self.store.exists(&JobKeys::job(id))? {
            debug!(job_id = %id, "result record missing, reconstructing as pending");
            return Ok(JobResult::pending(id));
        }

        Err(JobError::NotFound(id))
    }

    /// Apply `update` to job `id` if the lifecycle allows it.
    ///
    /// Disallowed transitions and updates for expired jobs are reported
    /// through [`UpdateOutcome`], not as errors. An applied update refreshes
    /// the result TTL and is published on [`JobKeys::RESULT_CHANNEL`].
    pub fn update_status(&self, id: JobId, update: &StatusUpdate) -> Result<UpdateOutcome, JobError> {
        let current = match self.get_result(id) {
            Ok(result) => result,
            Err(JobError::NotFound(_)) => {
                warn!(job_id = %id, status = %update.status, "status update for unknown or expired job");
                return Ok(UpdateOutcome::Expired);
            }
            Err(e) => return Err(e),
        };

        let mut next = current.clone();
        if let Err(e) = next.apply(update, Utc::now()) {
            warn!(job_id = %id, error = %e, "status update ignored");
            return Ok(UpdateOutcome::Ignored {
                current: current.status,
                requested: update.status,
            });
        }

        if next.status == JobStatus::Processing
            && !self
                .store
                .set_if_absent(&JobKeys::claim(id), b"1", Some(self.result_ttl))?
        {
            return self.lost_race(id, update);
        }

        let payload = serde_json::to_vec(&next)?;

        if next.status.is_terminal() {
            if !self
                .store
                .set_if_absent(&JobKeys::final_result(id), &payload, Some(self.result_ttl))?
            {
                return self.lost_race(id, update);
            }
        } else if self.store.exists(&JobKeys::final_result(id))? {
            // Finished between our read and the claim.
            return self.lost_race(id, update);
        }

        self.store
            .set(&JobKeys::result(id), &payload, Some(self.result_ttl))?;

        if let Err(e) = self.store.publish(JobKeys::RESULT_CHANNEL, &payload) {
            warn!(job_id = %id, error = %e, "result notification failed");
        }

        info!(job_id = %id, from = %current.status, to = %next.status, "job status updated");
        Ok(UpdateOutcome::Applied(next))
    }

    fn lost_race(&self, id: JobId, update: &StatusUpdate) -> Result<UpdateOutcome, JobError> {
        let current = match self.get_result(id) {
            Ok(result) => result.status,
            Err(JobError::NotFound(_)) => return Ok(UpdateOutcome::Expired),
            Err(e) => return Err(e),
        };
        warn!(job_id = %id, status = %current, requested = %update.status, "concurrent status update won");
        Ok(UpdateOutcome::Ignored {
            current,
            requested: update.status,
        })
    }

    pub fn cancel(&self, id: JobId) -> Result<UpdateOutcome, JobError> {
        self.update_status(id, &StatusUpdate::cancelled())
    }

    /// Stream of every applied result, JSON-encoded [`JobResult`]s.
    pub fn subscribe_results(&self) -> Result<Subscription, JobError> {
        Ok(self.store.subscribe(JobKeys::RESULT_CHANNEL)?)
    }

    /// Delete both records of job `id`. Returns whether anything was removed.
    pub fn remove(&self, id: JobId) -> Result<bool, JobError> {
        let job = self.store.delete(&JobKeys::job(id))?;
        let result = self.store.delete(&JobKeys::result(id))?;
        let finished = self.clear_markers(id)?;
        Ok(job || result || finished)
    }

    /// Returns whether a final result was removed.
    fn clear_markers(&self, id: JobId) -> Result<bool, JobError> {
        self.store.delete(&JobKeys::claim(id))?;
        Ok(self.store.delete(&JobKeys::final_result(id))?)
    }

    fn write_result(&self, result: &JobResult) -> Result<(), JobError> {
        let payload = serde_json::to_vec(result)?;
        self.store
            .set(&JobKeys::result(result.job_id), &payload, Some(self.result_ttl))?;
        Ok(())
    }
}
