//! Runtime configuration, read from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `LUMEN_JOB_TTL_SECS` | `86400` |
//! | `LUMEN_RESULT_TTL_SECS` | `86400` |
//! | `LUMEN_CACHE_TTL_SECS` | `3600` |
//! | `LUMEN_POLL_INTERVAL_MS` | `1000` |
//! | `LUMEN_ERROR_BACKOFF_MS` | `5000` |
//! | `LUMEN_DUPLICATE_POLICY` | `reject` (`reject` or `upsert`) |
//! | `LUMEN_QUEUE_PREFIX` | `analytics` |
//! | `LUMEN_PRIORITY_THRESHOLD` | unset (no priority lanes) |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// What to do when a job id is submitted a second time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Refuse the submission with `JobError::DuplicateJob`.
    #[default]
    Reject,
    /// Overwrite the job record, reset its result to pending and enqueue again.
    Upsert,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(DuplicatePolicy::Reject),
            "upsert" => Ok(DuplicatePolicy::Upsert),
            other => Err(format!("expected `reject` or `upsert`, got `{other}`")),
        }
    }
}

/// Settings shared by the registry, dispatcher, queue consumers and cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub redis_url: String,
    /// Expiry of `job:<id>` records.
    pub job_ttl: Duration,
    /// Expiry of `job_result:<id>` records, refreshed on every status write.
    pub result_ttl: Duration,
    /// Default expiry for cache entries written without an explicit TTL.
    pub cache_ttl: Duration,
    /// Wait between polls of an empty queue.
    pub poll_interval: Duration,
    /// Wait after a store error inside a consumer loop.
    pub error_backoff: Duration,
    pub duplicate_policy: DuplicatePolicy,
    /// Queue names are `<queue_prefix>:<job type>`.
    pub queue_prefix: String,
    /// Jobs with `priority >= threshold` go to the `:high` lane.
    pub priority_threshold: Option<i32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            job_ttl: Duration::from_secs(24 * 60 * 60),
            result_ttl: Duration::from_secs(24 * 60 * 60),
            cache_ttl: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            duplicate_policy: DuplicatePolicy::Reject,
            queue_prefix: "analytics".to_string(),
            priority_threshold: None,
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup (tests, `.env` maps).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            job_ttl: parse_or(&lookup, "LUMEN_JOB_TTL_SECS", defaults.job_ttl, secs)?,
            result_ttl: parse_or(&lookup, "LUMEN_RESULT_TTL_SECS", defaults.result_ttl, secs)?,
            cache_ttl: parse_or(&lookup, "LUMEN_CACHE_TTL_SECS", defaults.cache_ttl, secs)?,
            poll_interval: parse_or(
                &lookup,
                "LUMEN_POLL_INTERVAL_MS",
                defaults.poll_interval,
                millis,
            )?,
            error_backoff: parse_or(
                &lookup,
                "LUMEN_ERROR_BACKOFF_MS",
                defaults.error_backoff,
                millis,
            )?,
            duplicate_policy: parse_or(
                &lookup,
                "LUMEN_DUPLICATE_POLICY",
                defaults.duplicate_policy,
                DuplicatePolicy::from_str,
            )?,
            queue_prefix: lookup("LUMEN_QUEUE_PREFIX").unwrap_or(defaults.queue_prefix),
            priority_threshold: parse_or(
                &lookup,
                "LUMEN_PRIORITY_THRESHOLD",
                defaults.priority_threshold,
                |raw| raw.parse::<i32>().map(Some).map_err(|e| e.to_string()),
            )?,
        })
    }
}

fn parse_or<F, T, P>(lookup: &F, key: &'static str, default: T, parse: P) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T, String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => parse(raw.trim()).map_err(|reason| ConfigError::Invalid {
            key,
            value: raw,
            reason,
        }),
    }
}

fn secs(raw: &str) -> Result<Duration, String> {
    let value: u64 = raw.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    if value == 0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(value))
}

fn millis(raw: &str) -> Result<Duration, String> {
    let value: u64 = raw.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    if value == 0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(Duration::from_millis(value))
}
