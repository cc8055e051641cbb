//! Job outcome record and status updates.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainResult;
use crate::id::JobId;
use crate::job::Parameters;
use crate::status::JobStatus;

/// Mutable status/outcome record associated 1:1 with a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_duration_ms: Option<u64>,
}

impl JobResult {
    /// Initial record written alongside a new job.
    pub fn pending(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            result: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            processing_duration_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn processing_duration(&self) -> Option<Duration> {
        self.processing_duration_ms.map(Duration::from_millis)
    }

    /// Apply a status update at `now`.
    ///
    /// Fails without touching `self` when the lifecycle forbids the transition.
    pub fn apply(&mut self, update: &StatusUpdate, now: DateTime<Utc>) -> DomainResult<()> {
        self.status = self.status.transition(update.status)?;

        if update.status == JobStatus::Processing {
            self.started_at = Some(now);
        }

        if update.status.is_terminal() {
            self.completed_at = Some(now);
            self.processing_duration_ms = self
                .started_at
                .map(|started| (now - started).num_milliseconds().max(0) as u64);
        }

        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        if let Some(message) = &update.error_message {
            self.error_message = Some(message.clone());
        }

        Ok(())
    }
}

/// A requested status change, as sent back by consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            error_message: None,
        }
    }

    pub fn processing() -> Self {
        Self::new(JobStatus::Processing)
    }

    pub fn completed(result: Parameters) -> Self {
        Self {
            result: Some(result),
            ..Self::new(JobStatus::Completed)
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            error_message: Some(error_message.into()),
            ..Self::new(JobStatus::Failed)
        }
    }

    pub fn cancelled() -> Self {
        Self::new(JobStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;
    use serde_json::json;

    fn output() -> Parameters {
        let mut map = Parameters::new();
        map.insert("accuracy".to_string(), json!(0.85));
        map
    }

    #[test]
    fn full_lifecycle_records_timing() {
        let mut record = JobResult::pending(JobId::new());
        let t0 = Utc::now();

        record.apply(&StatusUpdate::processing(), t0).unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.started_at, Some(t0));
        assert!(record.completed_at.is_none());

        let t1 = t0 + chrono::Duration::milliseconds(1500);
        record.apply(&StatusUpdate::completed(output()), t1).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.completed_at, Some(t1));
        assert_eq!(record.processing_duration(), Some(Duration::from_millis(1500)));
        assert_eq!(record.result, Some(output()));
    }

    #[test]
    fn failure_keeps_error_message() {
        let mut record = JobResult::pending(JobId::new());
        let now = Utc::now();
        record.apply(&StatusUpdate::processing(), now).unwrap();
        record.apply(&StatusUpdate::failed("boom"), now).unwrap();

        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
        assert!(record.result.is_none());
    }

    #[test]
    fn cancelling_pending_job_has_no_duration() {
        let mut record = JobResult::pending(JobId::new());
        record.apply(&StatusUpdate::cancelled(), Utc::now()).unwrap();

        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(record.completed_at.is_some());
        assert!(record.processing_duration_ms.is_none());
    }

    #[test]
    fn rejected_update_leaves_record_untouched() {
        let mut record = JobResult::pending(JobId::new());
        record.apply(&StatusUpdate::cancelled(), Utc::now()).unwrap();
        let before = record.clone();

        let err = record
            .apply(&StatusUpdate::completed(output()), Utc::now())
            .unwrap_err();

        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(record, before);
    }

    #[test]
    fn pending_record_serializes_minimal_fields() {
        let id = JobId::new();
        let value = serde_json::to_value(JobResult::pending(id)).unwrap();
        assert_eq!(
            value,
            json!({ "jobId": id.to_string(), "status": "pending" })
        );
    }
}
