//! Job description submitted by producers.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Schema-less ordered mapping used for job parameters and results.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Kind of analytics work a job asks for.
///
/// Unrecognized type names decode to [`JobType::General`] so that a job from a
/// newer producer is still accepted and handled by the generic worker pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    DataProcessing,
    ModelTraining,
    Prediction,
    Visualization,
    StatisticalAnalysis,
    General,
}

impl JobType {
    pub const ALL: [JobType; 6] = [
        JobType::DataProcessing,
        JobType::ModelTraining,
        JobType::Prediction,
        JobType::Visualization,
        JobType::StatisticalAnalysis,
        JobType::General,
    ];

    /// Snake-case name used on the wire and in queue names.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DataProcessing => "data_processing",
            JobType::ModelTraining => "model_training",
            JobType::Prediction => "prediction",
            JobType::Visualization => "visualization",
            JobType::StatisticalAnalysis => "statistical_analysis",
            JobType::General => "general",
        }
    }

    /// Lenient lookup: accepts `data_processing`, `DataProcessing`, `data-processing`.
    pub fn from_name(name: &str) -> Option<JobType> {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        JobType::ALL
            .into_iter()
            .find(|t| t.as_str().replace('_', "") == normalized)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::from_name(s)
            .ok_or_else(|| DomainError::validation(format!("unknown job type: {s}")))
    }
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        JobType::from_name(&value).unwrap_or(JobType::General)
    }
}

impl From<JobType> for String {
    fn from(value: JobType) -> Self {
        value.as_str().to_string()
    }
}

/// Producer input for a new job (everything except identity and timestamps).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub dataset_ref: String,
    #[serde(default)]
    pub parameters: Parameters,
    pub owner_ref: String,
    #[serde(default)]
    pub priority: i32,
}

impl NewJob {
    pub fn new(
        job_type: JobType,
        dataset_ref: impl Into<String>,
        owner_ref: impl Into<String>,
    ) -> Self {
        Self {
            job_type,
            dataset_ref: dataset_ref.into(),
            parameters: Parameters::new(),
            owner_ref: owner_ref.into(),
            priority: 0,
        }
    }

    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn validate(&self) -> DomainResult<()> {
        if self.dataset_ref.trim().is_empty() {
            return Err(DomainError::validation("dataset reference must not be empty"));
        }
        if self.owner_ref.trim().is_empty() {
            return Err(DomainError::validation("owner reference must not be empty"));
        }
        Ok(())
    }
}

/// An immutable unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub dataset_ref: String,
    #[serde(default)]
    pub parameters: Parameters,
    pub created_at: DateTime<Utc>,
    pub owner_ref: String,
    #[serde(default)]
    pub priority: i32,
}

impl Job {
    /// Build a job with a freshly generated id.
    pub fn new(input: NewJob) -> DomainResult<Self> {
        Self::with_id(JobId::new(), input)
    }

    /// Build a job with a caller-supplied id (retries reuse the original id).
    pub fn with_id(id: JobId, input: NewJob) -> DomainResult<Self> {
        input.validate()?;
        Ok(Self {
            id,
            job_type: input.job_type,
            dataset_ref: input.dataset_ref,
            parameters: input.parameters,
            created_at: Utc::now(),
            owner_ref: input.owner_ref,
            priority: input.priority,
        })
    }
}
