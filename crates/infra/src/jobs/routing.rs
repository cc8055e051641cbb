//! Job type to queue routing.

use lumen_core::{Job, JobType};

use crate::config::Settings;

/// Suffix of the high-priority lane next to each queue.
pub const HIGH_LANE_SUFFIX: &str = ":high";

/// Total mapping from job type to queue name.
///
/// Queues are named `<prefix>:<job type>`. When a priority threshold is set,
/// jobs at or above it go to `<queue>:high`, which consumers drain first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRouter {
    prefix: String,
    priority_threshold: Option<i32>,
}

impl Default for QueueRouter {
    fn default() -> Self {
        Self::new("analytics")
    }
}

impl QueueRouter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            priority_threshold: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            prefix: settings.queue_prefix.clone(),
            priority_threshold: settings.priority_threshold,
        }
    }

    pub fn with_priority_threshold(mut self, threshold: i32) -> Self {
        self.priority_threshold = Some(threshold);
        self
    }

    pub fn priority_threshold(&self) -> Option<i32> {
        self.priority_threshold
    }

    pub fn queue_for(&self, job_type: JobType) -> String {
        format!("{}:{}", self.prefix, job_type.as_str())
    }

    /// Queue (or high lane) a job is published to.
    pub fn route(&self, job: &Job) -> String {
        let queue = self.queue_for(job.job_type);
        match self.priority_threshold {
            Some(threshold) if job.priority >= threshold => format!("{queue}{HIGH_LANE_SUFFIX}"),
            _ => queue,
        }
    }

    /// Lanes a consumer of `job_type` should drain, highest priority first.
    pub fn lanes(&self, job_type: JobType) -> Vec<String> {
        let queue = self.queue_for(job_type);
        if self.priority_threshold.is_some() {
            vec![format!("{queue}{HIGH_LANE_SUFFIX}"), queue]
        } else {
            vec![queue]
        }
    }

    /// Every base queue, in [`JobType::ALL`] order.
    pub fn queues(&self) -> Vec<String> {
        JobType::ALL.into_iter().map(|t| self.queue_for(t)).collect()
    }
}
