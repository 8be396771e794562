//! Shared fixtures for worker tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use vnote_media::{MediaError, MediaResult, MediaTransform};
use vnote_notify::{NotifyError, NotifyResult, Notifier};
use vnote_store::{Fields, InMemoryStore};
use vnote_worker::{JobExecutor, JobFetcher, Pipeline, WorkerConfig};

pub const JOBS: &str = "circle_jobs";
pub const USERS: &str = "users";

pub fn fields(value: Value) -> Fields {
    value.as_object().cloned().expect("fixture must be an object")
}

/// Transform that copies a marker into the output, or fails on demand.
#[derive(Default)]
pub struct FakeTransform {
    pub calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    pub failure: Mutex<Option<String>>,
    pub delay: Option<Duration>,
}

impl FakeTransform {
    pub fn failing(stderr: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(Some(stderr.to_string())),
            delay: None,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaTransform for FakeTransform {
    async fn transform(&self, input: &Path, output: &Path) -> MediaResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((input.to_path_buf(), output.to_path_buf()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failure.lock().unwrap().clone();
        if let Some(stderr) = failure {
            return Err(MediaError::ffmpeg_failed("FFmpeg exited with error", Some(stderr), Some(1)));
        }

        let source = tokio::fs::read(input).await?;
        let mut note = b"note:".to_vec();
        note.extend_from_slice(&source);
        tokio::fs::write(output, note).await?;
        Ok(())
    }
}

/// Notifier that records deliveries and the file present at send time.
#[derive(Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<(i64, Vec<u8>)>>,
    pub fail_with: Mutex<Option<String>>,
}

impl FakeNotifier {
    pub fn failing(description: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_with: Mutex::new(Some(description.to_string())),
        }
    }

    pub fn sent(&self) -> Vec<(i64, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send_video_note(&self, chat_id: i64, path: &Path) -> NotifyResult<()> {
        let failure = self.fail_with.lock().unwrap().clone();
        if let Some(description) = failure {
            return Err(NotifyError::api(400, description));
        }
        let content = tokio::fs::read(path).await?;
        self.sent.lock().unwrap().push((chat_id, content));
        Ok(())
    }
}

/// A worker wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub transform: Arc<FakeTransform>,
    pub notifier: Arc<FakeNotifier>,
    pub config: WorkerConfig,
    pub cache: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeTransform::default(), FakeNotifier::default())
    }

    pub fn with(transform: FakeTransform, notifier: FakeNotifier) -> Self {
        let cache = tempfile::tempdir().expect("tempdir");
        let config = WorkerConfig {
            cache_dir: cache.path().join("cache"),
            idle_delay: Duration::from_millis(20),
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
            worker_id: "worker-a".to_string(),
            ..WorkerConfig::default()
        };
        Self {
            store: Arc::new(InMemoryStore::new()),
            transform: Arc::new(transform),
            notifier: Arc::new(notifier),
            config,
            cache,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_for(&self.config)
    }

    pub fn pipeline_for(&self, config: &WorkerConfig) -> Pipeline {
        Pipeline::new(
            self.store.clone(),
            self.transform.clone(),
            self.notifier.clone(),
            config.clone(),
        )
    }

    pub fn executor(&self) -> JobExecutor {
        self.executor_for(&self.config)
    }

    pub fn executor_for(&self, config: &WorkerConfig) -> JobExecutor {
        let fetcher = JobFetcher::new(self.store.clone(), config.collection.clone());
        JobExecutor::new(fetcher, self.pipeline_for(config), config)
    }

    /// Owner `u1` with chat id 4242 and no circles yet.
    pub fn seed_user(&self) {
        self.store.insert(
            USERS,
            fields(json!({"id": "u1", "tgid": 4242, "username": "ann", "circle_count": 0, "coins": 10})),
        );
    }

    /// Queued job `abc` owned by `u1` with `v.mp4` attached.
    pub fn seed_job(&self, id: &str, input: &[u8]) {
        self.store.insert(
            JOBS,
            fields(json!({"id": id, "status": "queued", "input_media": "v.mp4", "owner": "u1", "output_media": ""})),
        );
        self.store.put_file(JOBS, id, "v.mp4", input.to_vec());
    }

    pub fn job_field(&self, id: &str, field: &str) -> Option<String> {
        self.store
            .record(JOBS, id)
            .and_then(|r| r.get_str(field).map(str::to_string))
    }

    pub fn circle_count(&self) -> i64 {
        self.store
            .record(USERS, "u1")
            .and_then(|r| r.get_i64("circle_count"))
            .unwrap_or_default()
    }

    pub fn cache_entries(&self) -> usize {
        std::fs::read_dir(&self.config.cache_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
