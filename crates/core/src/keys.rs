//! Store key layout.
//!
//! Every key is a pure function of (entity kind, id), so any process can
//! rebuild it without shared state.

use crate::id::JobId;

/// Cache key prefixes and builders.
pub struct CacheKeys;

impl CacheKeys {
    pub const DATASET_PREFIX: &'static str = "dataset:";
    pub const MODEL_PREFIX: &'static str = "model:";
    pub const USER_PREFIX: &'static str = "user:";
    pub const REPORT_PREFIX: &'static str = "report:";
    pub const STATS_PREFIX: &'static str = "stats:";
    pub const PROFILE_PREFIX: &'static str = "profile:";
    pub const RESULT_PREFIX: &'static str = "result:";
    pub const VIZ_PREFIX: &'static str = "viz:";

    pub fn dataset(dataset_id: &str) -> String {
        format!("{}{}", Self::DATASET_PREFIX, dataset_id)
    }

    /// Dataset profile/summary statistics.
    pub fn dataset_profile(dataset_id: &str) -> String {
        format!("{}{}", Self::PROFILE_PREFIX, dataset_id)
    }

    pub fn model(model_id: &str) -> String {
        format!("{}{}", Self::MODEL_PREFIX, model_id)
    }

    pub fn model_predictions(model_id: &str, input_hash: &str) -> String {
        format!("{}{}:predictions:{}", Self::MODEL_PREFIX, model_id, input_hash)
    }

    pub fn user(user_id: &str) -> String {
        format!("{}{}", Self::USER_PREFIX, user_id)
    }

    pub fn report(report_id: &str) -> String {
        format!("{}{}", Self::REPORT_PREFIX, report_id)
    }

    pub fn statistics(dataset_id: &str, analysis_type: &str) -> String {
        format!("{}{}:{}", Self::STATS_PREFIX, dataset_id, analysis_type)
    }

    pub fn visualization(dataset_id: &str, chart_type: &str, config_hash: &str) -> String {
        format!("{}{}:{}:{}", Self::VIZ_PREFIX, dataset_id, chart_type, config_hash)
    }

    pub fn processing_result(dataset_id: &str, operation: &str) -> String {
        format!("{}{}:{}", Self::RESULT_PREFIX, dataset_id, operation)
    }

    /// Glob matching every key derived from one dataset under `prefix`.
    pub fn dataset_pattern(prefix: &str, dataset_id: &str) -> String {
        format!("{}{}*", prefix, dataset_id)
    }
}

/// Keys owned by the job registry.
pub struct JobKeys;

impl JobKeys {
    pub const JOB_PREFIX: &'static str = "job:";
    pub const RESULT_PREFIX: &'static str = "job_result:";

    /// Channel carrying every applied status change.
    pub const RESULT_CHANNEL: &'static str = "job_result:notification";

    pub fn job(id: JobId) -> String {
        format!("{}{}", Self::JOB_PREFIX, id)
    }

    pub fn result(id: JobId) -> String {
        format!("{}{}", Self::RESULT_PREFIX, id)
    }

    /// Written once by the consumer that moves the job to processing.
    pub fn claim(id: JobId) -> String {
        format!("{}{}:claim", Self::RESULT_PREFIX, id)
    }

    /// Holds the finished result; written once, by the first terminal update.
    pub fn final_result(id: JobId) -> String {
        format!("{}{}:final", Self::RESULT_PREFIX, id)
    }
}

/// Notification channel paired with a queue.
pub fn notification_channel(queue: &str) -> String {
    format!("{queue}:notification")
}
