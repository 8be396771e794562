//! Structured job logging.

use tracing::{error, info, warn, Span};
use vnote_models::JobId;

use crate::error::Stage;

/// Logs one job's progress with its id, operation and stage attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    operation: &'static str,
}

impl JobLogger {
    pub fn new(job_id: &JobId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.clone(),
            operation,
        }
    }

    /// Span that every event of this job runs inside.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, operation = self.operation)
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "Job started: {}", message);
    }

    /// A stage finished.
    pub fn log_stage(&self, stage: Stage, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            stage = %stage,
            "Job progress: {}", message
        );
    }

    /// Something went wrong without ending the job.
    pub fn log_warning(&self, stage: Stage, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            stage = %stage,
            "Job warning: {}", message
        );
    }

    /// The failure that ended the job.
    pub fn log_error(&self, stage: Stage, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            stage = %stage,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "Job completed: {}", message);
    }
}
