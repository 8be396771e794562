//! Job lifecycle states and their persisted string form.
//!
//! The record store keeps `status` as free text. The worker only ever writes
//! the canonical values below; failures are written as `error: <message>`
//! with the whole string capped at [`MAX_STATUS_LEN`] characters.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::utils::truncate_chars;

/// Maximum length of the persisted status string, in characters.
pub const MAX_STATUS_LEN: usize = 255;

/// Maximum length of the `last_error` diagnostic, in characters.
pub const MAX_ERROR_DETAIL_LEN: usize = 4000;

const ERROR_PREFIX: &str = "error";

/// Status value that does not belong to the job state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status: {0:?}")]
pub struct UnknownStatus(pub String);

/// Job processing status.
///
/// ```text
/// queued -> processing -> sending -> completed
///              |            |
///              +-> error <--+
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobStatus {
    /// Created by a producer, waiting for a worker
    #[default]
    Queued,
    /// Claimed by a worker, downloading or transcoding
    Processing,
    /// Transcoded, result being uploaded and delivered
    Sending,
    /// Result uploaded
    Completed,
    /// Failed; carries the truncated diagnostic
    Error(String),
}

impl JobStatus {
    /// Build an error status from a diagnostic message.
    ///
    /// The encoded form (`error: <message>`) never exceeds [`MAX_STATUS_LEN`].
    pub fn error(message: impl AsRef<str>) -> Self {
        let budget = MAX_STATUS_LEN - ERROR_PREFIX.len() - 2;
        JobStatus::Error(truncate_chars(message.as_ref().trim(), budget).to_string())
    }

    /// Get string representation of the state, without the error detail.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Sending => "sending",
            JobStatus::Completed => "completed",
            JobStatus::Error(_) => ERROR_PREFIX,
        }
    }

    /// Encode for the record store.
    pub fn encode(&self) -> String {
        match self {
            JobStatus::Error(msg) if !msg.is_empty() => format!("{}: {}", ERROR_PREFIX, msg),
            other => other.as_str().to_string(),
        }
    }

    /// Decode a status string read from the record store.
    pub fn decode(raw: &str) -> Result<Self, UnknownStatus> {
        let trimmed = raw.trim();
        match trimmed {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "sending" => Ok(JobStatus::Sending),
            "completed" => Ok(JobStatus::Completed),
            _ => match trimmed.strip_prefix(ERROR_PREFIX) {
                Some(rest) if rest.is_empty() || rest.starts_with(':') => {
                    Ok(JobStatus::Error(rest.trim_start_matches(':').trim().to_string()))
                }
                _ => Err(UnknownStatus(raw.to_string())),
            },
        }
    }

    /// Check if this is a terminal state (no more transitions in this run).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JobStatus::Error(_))
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Sending)
                | (JobStatus::Processing, JobStatus::Error(_))
                | (JobStatus::Sending, JobStatus::Completed)
                | (JobStatus::Sending, JobStatus::Error(_))
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl TryFrom<String> for JobStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, UnknownStatus> {
        JobStatus::decode(&value)
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.encode()
    }
}
