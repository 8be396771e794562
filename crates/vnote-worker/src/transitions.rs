//! Job status transitions.
//!
//! Every status write goes through [`StatusManager`], which checks the
//! transition against the job's in-memory state before touching the store.
//!
//! Claims are records in a separate collection whose id is the job id.
//! Creating one is a single insert that the store rejects once the id is
//! taken, so at most one worker ever owns a job.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use vnote_models::{truncate_chars, Job, JobStatus, MAX_ERROR_DETAIL_LEN};
use vnote_store::{FileUpload, Fields, RecordStore};

use crate::error::{ClaimError, UpdateFailed};

/// Result of trying to claim a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This worker owns the job now
    Claimed,
    /// Another worker got there first, or the job is gone
    Lost,
}

/// Writes job status changes to the record store.
#[derive(Clone)]
pub struct StatusManager {
    store: Arc<dyn RecordStore>,
    collection: String,
    claims_collection: String,
    worker_id: String,
}

impl StatusManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        collection: impl Into<String>,
        claims_collection: impl Into<String>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            claims_collection: claims_collection.into(),
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn check(job: &Job, next: &JobStatus) -> Result<(), UpdateFailed> {
        if job.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(UpdateFailed::InvalidTransition {
                from: job.status.clone(),
                to: next.clone(),
            })
        }
    }

    /// Move `job` to `next` with a single-field patch.
    ///
    /// A failed write is returned but the in-memory status still advances,
    /// so the caller can carry on with the pipeline.
    pub async fn set_status(&self, job: &mut Job, next: JobStatus) -> Result<(), UpdateFailed> {
        Self::check(job, &next)?;

        let mut fields = Fields::new();
        fields.insert("status".into(), Value::String(next.encode()));

        let result = self.store.patch(&self.collection, job.id.as_str(), fields).await;
        let from = std::mem::replace(&mut job.status, next);

        match result {
            Ok(_) => {
                debug!(job_id = %job.id, from = %from, to = %job.status, "Status updated");
                Ok(())
            }
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    to = %job.status,
                    error = %e,
                    "Failed to persist status change"
                );
                Err(UpdateFailed::Store(e))
            }
        }
    }

    /// Claim a queued job for this worker.
    ///
    /// Inserts the claim record first. Only the worker whose insert lands
    /// moves the job to `processing`; everyone else gets `Lost`.
    pub async fn claim(&self, job: &mut Job) -> Result<ClaimOutcome, ClaimError> {
        if job.status != JobStatus::Queued {
            return Ok(ClaimOutcome::Lost);
        }

        let mut claim = Fields::new();
        claim.insert("id".into(), Value::String(job.id.to_string()));
        claim.insert("job".into(), Value::String(job.id.to_string()));
        claim.insert("worker".into(), Value::String(self.worker_id.clone()));

        match self.store.create(&self.claims_collection, claim).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {
                debug!(job_id = %job.id, "Claim lost, job already claimed");
                return Ok(ClaimOutcome::Lost);
            }
            Err(e) => return Err(ClaimError(e)),
        }

        let mut fields = Fields::new();
        fields.insert("status".into(), Value::String(JobStatus::Processing.encode()));
        fields.insert("claimed_by".into(), Value::String(self.worker_id.clone()));

        match self.store.patch(&self.collection, job.id.as_str(), fields).await {
            Ok(_) => {
                job.status = JobStatus::Processing;
                job.claimed_by = Some(self.worker_id.clone());
                debug!(job_id = %job.id, worker_id = %self.worker_id, "Job claimed");
                Ok(ClaimOutcome::Claimed)
            }
            Err(e) => {
                self.release(job).await;
                if e.is_not_found() {
                    debug!(job_id = %job.id, "Job disappeared while claiming");
                    Ok(ClaimOutcome::Lost)
                } else {
                    Err(ClaimError(e))
                }
            }
        }
    }

    /// Drop this worker's claim so the job can be picked up again.
    async fn release(&self, job: &Job) {
        if let Err(e) = self.store.delete(&self.claims_collection, job.id.as_str()).await {
            warn!(
                job_id = %job.id,
                error = %e,
                "Failed to release claim, job stays queued until the claim record is removed"
            );
        }
    }

    /// Record a failure: `status = "error: <message>"` plus the longer
    /// diagnostic in `last_error`.
    pub async fn fail(&self, job: &mut Job, message: &str) -> Result<(), UpdateFailed> {
        let next = JobStatus::error(message);
        Self::check(job, &next)?;

        let detail = truncate_chars(message.trim(), MAX_ERROR_DETAIL_LEN).to_string();
        let mut fields = Fields::new();
        fields.insert("status".into(), Value::String(next.encode()));
        fields.insert("last_error".into(), Value::String(detail.clone()));

        let result = self.store.patch(&self.collection, job.id.as_str(), fields).await;
        job.status = next;
        job.last_error = Some(detail);

        result.map(|_| ()).map_err(|e| {
            warn!(job_id = %job.id, error = %e, "Failed to persist error status");
            UpdateFailed::Store(e)
        })
    }

    /// Upload the result as `output_media` and mark the job completed in
    /// the same request.
    pub async fn complete_with_upload(&self, job: &mut Job, output: &Path) -> Result<(), UpdateFailed> {
        Self::check(job, &JobStatus::Completed)?;

        let mut fields = Fields::new();
        fields.insert("status".into(), Value::String(JobStatus::Completed.encode()));
        let upload = FileUpload::new("output_media", output);

        let record = self
            .store
            .patch_with_file(&self.collection, job.id.as_str(), fields, &upload)
            .await?;

        job.status = JobStatus::Completed;
        job.output_media = record
            .get_str("output_media")
            .map(str::to_string)
            .unwrap_or_else(|| upload.file_name());
        Ok(())
    }

    /// Re-read a job whose upload reported failure.
    ///
    /// Returns `true` when the store already holds it as `completed` with
    /// an output file, and brings `job` in line with the stored record.
    pub async fn confirm_completed(&self, job: &mut Job) -> bool {
        let record = match self.store.get(&self.collection, job.id.as_str()).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Could not re-read job after failed upload");
                return false;
            }
        };

        let completed = record.get_str("status") == Some(JobStatus::Completed.as_str());
        let output = record.get_str("output_media").unwrap_or_default();
        if !completed || output.is_empty() {
            return false;
        }

        job.status = JobStatus::Completed;
        job.output_media = output.to_string();
        true
    }
}
