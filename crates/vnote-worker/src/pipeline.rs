//! Video note pipeline for a single claimed job.
//!
//! Stages run strictly in order:
//!
//! 1. validate the input reference
//! 2. acquire scratch space
//! 3. download the source
//! 4. transcode it to a video note, then mark the job `sending`
//! 5. upload the result and mark the job `completed`
//! 6. deliver the note to the owner
//! 7. bump the owner's `circle_count`
//!
//! Stages 1-5 share the per-job deadline and a failure in any of them writes
//! the error status. Stages 6 and 7 are best effort.
//!
//! An upload that reports failure is checked against the stored record
//! first. If the store already has the job `completed` with its output, the
//! run continues as a success and the record is left alone.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;
use vnote_media::MediaTransform;
use vnote_models::{format_bytes, Job, JobId, JobStatus, User};
use vnote_notify::Notifier;
use vnote_store::{RecordStore, StoreError};

use crate::config::WorkerConfig;
use crate::error::{JobFailure, Stage, StageError, UpdateFailed};
use crate::logging::JobLogger;
use crate::metrics;
use crate::scratch::ScratchFiles;
use crate::transitions::StatusManager;

/// What happened to one job.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: JobId,
    /// In-memory status at the end of the run
    pub status: JobStatus,
    /// Failure that ended the run, if any
    pub failure: Option<JobFailure>,
    /// Problems after completion that did not change the outcome
    pub soft_failures: Vec<JobFailure>,
    pub delivered: bool,
    pub counted: bool,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs claimed jobs through download, transform, upload and delivery.
pub struct Pipeline {
    store: Arc<dyn RecordStore>,
    transform: Arc<dyn MediaTransform>,
    notifier: Arc<dyn Notifier>,
    status: StatusManager,
    config: WorkerConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transform: Arc<dyn MediaTransform>,
        notifier: Arc<dyn Notifier>,
        config: WorkerConfig,
    ) -> Self {
        let status = StatusManager::new(
            store.clone(),
            config.collection.clone(),
            config.claims_collection.clone(),
            config.worker_id.clone(),
        );
        Self {
            store,
            transform,
            notifier,
            status,
            config,
        }
    }

    pub fn status_manager(&self) -> &StatusManager {
        &self.status
    }

    /// Run a job that this worker has already claimed.
    pub async fn execute(&self, job: &mut Job) -> JobReport {
        let logger = JobLogger::new(&job.id, "video_note");
        let span = logger.span();
        self.execute_inner(job, &logger).instrument(span).await
    }

    async fn execute_inner(&self, job: &mut Job, logger: &JobLogger) -> JobReport {
        let started = Instant::now();
        logger.log_start(&format!("input={} owner={}", job.input_media, job.owner));

        let mut stage = Stage::Validate;
        let mut scratch: Option<ScratchFiles> = None;
        let outcome = tokio::time::timeout(
            self.config.job_timeout,
            self.run_stages(job, logger, &mut stage, &mut scratch),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(failure)) => Some(failure),
            Err(_) => Some(JobFailure::new(
                stage,
                StageError::DeadlineExceeded(self.config.job_timeout.as_secs()),
            )),
        };
        if let Some(failure) = failure {
            if failure.stage != Stage::Upload || !self.status.confirm_completed(job).await {
                return self.abort(job, logger, failure, started).await;
            }
            logger.log_warning(
                Stage::Upload,
                &format!("job is stored as completed despite: {}", failure.error),
            );
        }

        let mut report = JobReport {
            job_id: job.id.clone(),
            status: job.status.clone(),
            failure: None,
            soft_failures: Vec::new(),
            delivered: false,
            counted: false,
            elapsed: Duration::ZERO,
        };

        let output = scratch.as_ref().map(|files| files.output().to_path_buf());
        match timed(Stage::Notify, self.notify(job, output.as_deref())).await {
            Ok(chat_id) => {
                report.delivered = true;
                logger.log_stage(Stage::Notify, &format!("delivered to chat {}", chat_id));
            }
            Err(failure) => {
                logger.log_warning(failure.stage, &failure.error.to_string());
                metrics::record_soft_failure(failure.stage);
                report.soft_failures.push(failure);
            }
        }
        drop(scratch);

        if report.delivered {
            match timed(Stage::PostEffect, self.bump_circle_count(job)).await {
                Ok(count) => {
                    report.counted = true;
                    logger.log_stage(Stage::PostEffect, &format!("circle_count is now {}", count));
                }
                Err(failure) => {
                    logger.log_warning(failure.stage, &failure.error.to_string());
                    metrics::record_soft_failure(failure.stage);
                    report.soft_failures.push(failure);
                }
            }
        }

        report.elapsed = started.elapsed();
        metrics::record_job("completed");
        logger.log_completion(&format!(
            "output={} delivered={} in {:.1}s",
            job.output_media,
            report.delivered,
            report.elapsed.as_secs_f64()
        ));
        report
    }

    /// Stages 1-5. The scratch guard is parked in `scratch` so the output
    /// file outlives a deadline that fires during the upload.
    async fn run_stages(
        &self,
        job: &mut Job,
        logger: &JobLogger,
        stage: &mut Stage,
        scratch: &mut Option<ScratchFiles>,
    ) -> Result<(), JobFailure> {
        *stage = Stage::Validate;
        timed(Stage::Validate, async {
            if job.has_input() {
                Ok(())
            } else {
                Err(StageError::MissingInput)
            }
        })
        .await?;

        *stage = Stage::Scratch;
        let files = timed(Stage::Scratch, async {
            ScratchFiles::acquire(&self.config.cache_dir, job, self.config.keep_scratch)
                .await
                .map_err(StageError::CacheUnavailable)
        })
        .await?;
        let input = files.input().to_path_buf();
        let output = files.output().to_path_buf();
        *scratch = Some(files);

        *stage = Stage::Download;
        let bytes = timed(Stage::Download, self.download(job, &input)).await?;
        logger.log_stage(Stage::Download, &format!("downloaded {}", format_bytes(bytes)));

        *stage = Stage::Transform;
        timed(Stage::Transform, self.transcode(&input, &output)).await?;
        logger.log_stage(Stage::Transform, "video note rendered");

        match self.status.set_status(job, JobStatus::Sending).await {
            Ok(()) => {}
            Err(UpdateFailed::Store(e)) => {
                logger.log_warning(Stage::Transform, &format!("could not persist sending status: {}", e));
            }
            Err(e) => return Err(JobFailure::new(Stage::Transform, StageError::UpdateFailed(e.to_string()))),
        }

        *stage = Stage::Upload;
        timed(Stage::Upload, async {
            self.status
                .complete_with_upload(job, &output)
                .await
                .map_err(|e| StageError::UploadFailed(e.to_string()))
        })
        .await?;
        logger.log_stage(Stage::Upload, &format!("uploaded {}", job.output_media));

        Ok(())
    }

    async fn download(&self, job: &Job, dest: &Path) -> Result<u64, StageError> {
        let limit = self.config.max_input_bytes;
        let request = self.store.download_file(
            &self.config.collection,
            job.id.as_str(),
            &job.input_media,
            dest,
            limit,
        );

        match tokio::time::timeout(self.config.download_timeout, request).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(StoreError::PayloadTooLarge { size, limit })) => Err(StageError::PayloadTooLarge { size, limit }),
            Ok(Err(e)) => Err(StageError::DownloadFailed(e.to_string())),
            Err(_) => Err(StageError::DownloadFailed(format!(
                "timed out after {}s",
                self.config.download_timeout.as_secs()
            ))),
        }
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), StageError> {
        match tokio::time::timeout(self.config.transform_timeout, self.transform.transform(input, output)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StageError::TransformFailed(e.diagnostic())),
            Err(_) => Err(StageError::TransformFailed(format!(
                "timed out after {}s",
                self.config.transform_timeout.as_secs()
            ))),
        }
    }

    /// Send the note to the owner's chat. Returns the chat id.
    async fn notify(&self, job: &Job, video: Option<&Path>) -> Result<i64, StageError> {
        let video = video.ok_or_else(|| StageError::NotifyFailed("rendered note is not on disk".to_string()))?;
        let user = self.owner(job).await.map_err(StageError::NotifyFailed)?;
        let chat_id = user
            .recipient()
            .ok_or_else(|| StageError::NotifyFailed(format!("owner {} has no telegram id", user.id)))?;

        self.notifier
            .send_video_note(chat_id, video)
            .await
            .map_err(|e| StageError::NotifyFailed(e.to_string()))?;
        Ok(chat_id)
    }

    async fn owner(&self, job: &Job) -> Result<User, String> {
        if job.owner.trim().is_empty() {
            return Err("job has no owner".to_string());
        }
        let record = self
            .store
            .get(&self.config.users_collection, &job.owner)
            .await
            .map_err(|e| format!("owner lookup failed: {}", e))?
            .ok_or_else(|| format!("owner {} not found", job.owner))?;
        record.decode().map_err(|e| e.to_string())
    }

    async fn bump_circle_count(&self, job: &Job) -> Result<i64, StageError> {
        self.store
            .increment(&self.config.users_collection, &job.owner, "circle_count", 1)
            .await
            .map_err(|e| StageError::UpdateFailed(UpdateFailed::Store(e).to_string()))
    }

    async fn abort(&self, job: &mut Job, logger: &JobLogger, failure: JobFailure, started: Instant) -> JobReport {
        let message = failure.error.to_string();
        logger.log_error(failure.stage, &message);

        if let Err(e) = self.status.fail(job, &message).await {
            logger.log_warning(failure.stage, &format!("could not record failure: {}", e));
        }

        metrics::record_job("failed");
        JobReport {
            job_id: job.id.clone(),
            status: job.status.clone(),
            failure: Some(failure),
            soft_failures: Vec::new(),
            delivered: false,
            counted: false,
            elapsed: started.elapsed(),
        }
    }
}

/// Await a stage, record its duration, and tag its error with the stage.
async fn timed<T, F>(stage: Stage, fut: F) -> Result<T, JobFailure>
where
    F: Future<Output = Result<T, StageError>>,
{
    let started = Instant::now();
    let result = fut.await;
    metrics::record_stage(stage, result.is_ok(), started.elapsed());
    result.map_err(|error| JobFailure::new(stage, error))
}
