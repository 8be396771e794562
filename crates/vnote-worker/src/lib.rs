//! Video note worker.
//!
//! This crate provides:
//! - Queue polling with an atomic claim per job
//! - The download, transcode, upload and delivery pipeline
//! - Status transitions with error annotation
//! - Backoff on store failures and graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod scratch;
pub mod transitions;

pub use config::WorkerConfig;
pub use error::{
    ClaimError, FetchError, JobFailure, Stage, StageError, UpdateFailed, WorkerError, WorkerResult,
};
pub use executor::{JobExecutor, TickOutcome};
pub use fetcher::JobFetcher;
pub use logging::JobLogger;
pub use pipeline::{JobReport, Pipeline};
pub use scratch::ScratchFiles;
pub use transitions::{ClaimOutcome, StatusManager};
