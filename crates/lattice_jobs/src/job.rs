//! Job model and JSON wire format.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lattice_core::{Error, Result};

/// Queue used when the caller does not name one.
pub const DEFAULT_QUEUE: &str = "default";
/// Retry budget used when the caller does not set one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Job lifecycle status.
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enqueue request. The client fills queue and retry defaults before
/// delegating to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub job_type: String,
    pub queue: String,
    pub payload: Vec<u8>,
    pub max_retries: Option<u32>,
}

impl JobRequest {
    pub fn new(job_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            job_type: job_type.into(),
            queue: String::new(),
            payload,
            max_retries: None,
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Fill defaults: empty queue becomes `"default"`, unset retry
    /// budget becomes 3.
    pub fn normalized(mut self) -> Self {
        if self.queue.is_empty() {
            self.queue = DEFAULT_QUEUE.to_string();
        }
        if self.max_retries.is_none() {
            self.max_retries = Some(DEFAULT_MAX_RETRIES);
        }
        self
    }
}

/// Persisted job record. Serializes to JSON with base64 payload/result
/// and RFC3339 UTC timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub queue: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub status: JobStatus,
    pub max_retries: u32,
    pub attempts: u32,
    #[serde(with = "base64_bytes")]
    pub result: Vec<u8>,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobInfo {
    /// Fresh record for an accepted request.
    pub fn from_request(id: impl Into<String>, request: &JobRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            job_type: request.job_type.clone(),
            queue: request.queue.clone(),
            payload: request.payload.clone(),
            status: JobStatus::Pending,
            max_retries: request.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            attempts: 0,
            result: Vec::new(),
            error: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Retry decision after a failed attempt. `attempts` was already
    /// incremented at dequeue, so the retries used so far are
    /// `attempts - 1`; the job fails permanently exactly when the
    /// budget is spent (`attempts == max_retries + 1`).
    pub fn should_retry(&self) -> bool {
        self.attempts <= self.max_retries
    }

    /// Guard for completion/failure writes: terminal records never
    /// transition again.
    pub(crate) fn ensure_not_terminal(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::conflict("job already in a terminal state")
                .with_detail("job_id", &self.id)
                .with_detail("status", self.status));
        }
        Ok(())
    }
}

mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(text).map_err(serde::de::Error::custom)
    }
}
