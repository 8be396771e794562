//! Worker error types.
//!
//! Each pipeline stage fails with a narrow [`StageError`]; the pipeline tags
//! it with the [`Stage`] it came from. None of these errors escape the poll
//! loop.

use std::fmt;

use thiserror::Error;
use vnote_models::JobStatus;
use vnote_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors raised while building or running the worker itself.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notifier error: {0}")]
    Notify(#[from] vnote_notify::NotifyError),

    #[error("Media error: {0}")]
    Media(#[from] vnote_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Claim,
    Validate,
    Scratch,
    Download,
    Transform,
    Upload,
    Notify,
    PostEffect,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Claim => "claim",
            Stage::Validate => "validate",
            Stage::Scratch => "scratch",
            Stage::Download => "download",
            Stage::Transform => "transform",
            Stage::Upload => "upload",
            Stage::Notify => "notify",
            Stage::PostEffect => "post_effect",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The store could not answer the queue query.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("record store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

/// The claim write failed for a reason other than losing the race.
#[derive(Debug, Error)]
#[error("claim failed: {0}")]
pub struct ClaimError(#[from] pub StoreError);

/// A status write or counter update did not happen.
#[derive(Debug, Error)]
pub enum UpdateFailed {
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("status write failed: {0}")]
    Store(#[from] StoreError),
}

/// Failure of a single pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("job has no input media")]
    MissingInput,

    #[error("input is {size} bytes, limit is {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("cache directory unavailable: {0}")]
    CacheUnavailable(#[source] std::io::Error),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("transform failed: {0}")]
    TransformFailed(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("notification failed: {0}")]
    NotifyFailed(String),

    #[error("update failed: {0}")]
    UpdateFailed(String),

    #[error("job exceeded its {0} second deadline")]
    DeadlineExceeded(u64),
}

impl StageError {
    /// Input rejected before any expensive work.
    pub fn is_validation(&self) -> bool {
        matches!(self, StageError::MissingInput | StageError::PayloadTooLarge { .. })
    }
}

/// A stage error tagged with the stage it happened in.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct JobFailure {
    pub stage: Stage,
    #[source]
    pub error: StageError,
}

impl JobFailure {
    pub fn new(stage: Stage, error: StageError) -> Self {
        Self { stage, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::PostEffect.to_string(), "post_effect");
        assert_eq!(Stage::Download.as_str(), "download");
    }

    #[test]
    fn test_validation_errors() {
        assert!(StageError::MissingInput.is_validation());
        assert!(StageError::PayloadTooLarge { size: 2, limit: 1 }.is_validation());
        assert!(!StageError::DownloadFailed("reset".into()).is_validation());
    }

    #[test]
    fn test_job_failure_display() {
        let failure = JobFailure::new(Stage::Transform, StageError::TransformFailed("exit 1".into()));
        assert_eq!(failure.to_string(), "transform stage failed: transform failed: exit 1");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = UpdateFailed::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Processing,
        };
        assert_eq!(err.to_string(), "invalid status transition completed -> processing");
    }
}
