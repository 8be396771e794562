//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

/// 50 MiB
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 50 * 1024 * 1024;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Collection holding circle jobs
    pub collection: String,
    /// Collection holding job owners
    pub users_collection: String,
    /// Collection of claim records, one per claimed job, keyed by job id
    pub claims_collection: String,
    /// Directory for scratch files
    pub cache_dir: PathBuf,
    /// Sleep between polls when the queue is empty
    pub idle_delay: Duration,
    /// Largest accepted input file
    pub max_input_bytes: u64,
    pub download_timeout: Duration,
    pub transform_timeout: Duration,
    /// Deadline for stages up to and including the upload
    pub job_timeout: Duration,
    /// First delay after a store failure
    pub backoff_base: Duration,
    /// Longest delay between polls while the store is failing
    pub backoff_max: Duration,
    /// Keep scratch files after a run (debugging)
    pub keep_scratch: bool,
    /// Written to `claimed_by` when claiming a job
    pub worker_id: String,
    /// Prometheus listener address, disabled when unset
    pub metrics_addr: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            collection: "circle_jobs".to_string(),
            users_collection: "users".to_string(),
            claims_collection: "job_claims".to_string(),
            cache_dir: PathBuf::from("cache"),
            idle_delay: Duration::from_secs(10),
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            download_timeout: Duration::from_secs(300),
            transform_timeout: Duration::from_secs(600),
            job_timeout: Duration::from_secs(1800),
            backoff_base: Duration::from_millis(1000),
            backoff_max: Duration::from_millis(60_000),
            keep_scratch: false,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            collection: env_string("WORKER_COLLECTION").unwrap_or(defaults.collection),
            users_collection: env_string("WORKER_USERS_COLLECTION").unwrap_or(defaults.users_collection),
            claims_collection: env_string("WORKER_CLAIMS_COLLECTION").unwrap_or(defaults.claims_collection),
            cache_dir: env_string("WORKER_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            idle_delay: env_parse("WORKER_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_delay),
            max_input_bytes: env_parse("WORKER_MAX_INPUT_BYTES").unwrap_or(defaults.max_input_bytes),
            download_timeout: env_parse("WORKER_DOWNLOAD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_timeout),
            transform_timeout: env_parse("WORKER_TRANSFORM_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.transform_timeout),
            job_timeout: env_parse("WORKER_JOB_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            backoff_base: env_parse("WORKER_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            backoff_max: env_parse("WORKER_BACKOFF_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_max),
            keep_scratch: env_string("WORKER_KEEP_SCRATCH")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.keep_scratch),
            worker_id: env_string("WORKER_ID").unwrap_or(defaults.worker_id),
            metrics_addr: env_string("METRICS_ADDR"),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}
