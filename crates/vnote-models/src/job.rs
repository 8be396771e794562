//! Circle job records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::JobStatus;

/// Record store identifier of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A circle job as stored in the record store.
///
/// Empty strings are how the store represents unset relation and file
/// fields, so `owner`, `input_media` and `output_media` default to `""`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Record id, assigned by the store
    pub id: JobId,

    /// Relation id of the owning user
    #[serde(default)]
    pub owner: String,

    /// File name of the uploaded source video
    #[serde(default)]
    pub input_media: String,

    /// File name of the produced video note
    #[serde(default)]
    pub output_media: String,

    /// Current status
    pub status: JobStatus,

    /// Last failure diagnostic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Worker currently holding the claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,

    /// Store creation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    /// Store update timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

impl Job {
    /// Create a queued job (used by tests and producers).
    pub fn queued(id: impl Into<String>, owner: impl Into<String>, input_media: impl Into<String>) -> Self {
        Self {
            id: JobId::from_string(id),
            owner: owner.into(),
            input_media: input_media.into(),
            output_media: String::new(),
            status: JobStatus::Queued,
            last_error: None,
            claimed_by: None,
            created: None,
            updated: None,
        }
    }

    pub fn has_input(&self) -> bool {
        !self.input_media.trim().is_empty()
    }

    pub fn has_output(&self) -> bool {
        !self.output_media.trim().is_empty()
    }

    /// Extension of the source file, `mp4` when it has none.
    pub fn input_extension(&self) -> &str {
        Path::new(&self.input_media)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("mp4")
    }

    /// Scratch file name of the downloaded source.
    pub fn input_scratch_name(&self) -> String {
        format!("{}_input.{}", self.id, self.input_extension())
    }

    /// Scratch file name of the transcoded result.
    pub fn output_scratch_name(&self) -> String {
        format!("{}_output.mp4", self.id)
    }
}
