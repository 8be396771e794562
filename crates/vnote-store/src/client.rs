//! PocketBase REST API client.
//!
//! Production-grade client with:
//! - Password auth with re-login on 401
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter for idempotent requests; creates and
//!   counter increments are sent once
//! - Observability (tracing spans, metrics)

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};

use crate::auth::{AuthSession, Credentials};
use crate::error::{StoreError, StoreResult};
use crate::metrics::{record_download, record_request};
use crate::retry::{with_retry, RetryConfig};
use crate::store::RecordStore;
use crate::types::{FileUpload, Fields, ListQuery, ListResponse, Precondition, Record};

/// Read-modify-write attempts for counters when the `field+` modifier is off.
const MAX_INCREMENT_ATTEMPTS: u32 = 3;

// =============================================================================
// Configuration
// =============================================================================

/// PocketBase client configuration.
#[derive(Debug, Clone)]
pub struct PocketBaseConfig {
    /// Base URL, e.g. `http://127.0.0.1:8090`
    pub base_url: String,
    pub credentials: Credentials,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
    /// Use the server-side `field+` modifier for counters
    pub atomic_increment: bool,
}

impl PocketBaseConfig {
    pub fn new(
        base_url: impl Into<String>,
        identity: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: Credentials {
                identity: identity.into(),
                password: password.into(),
                auth_collection: "_superusers".to_string(),
            },
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
            atomic_increment: true,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let base_url = require_env("POCKETBASE_URL")?;
        let identity = require_env("POCKETBASE_LOGIN")?;
        let password = require_env("POCKETBASE_PASSWORD")?;

        let timeout_secs: u64 = std::env::var("POCKETBASE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let connect_timeout_secs: u64 = std::env::var("POCKETBASE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            base_url,
            credentials: Credentials {
                identity,
                password,
                auth_collection: std::env::var("POCKETBASE_AUTH_COLLECTION")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "_superusers".to_string()),
            },
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            atomic_increment: std::env::var("POCKETBASE_ATOMIC_INCREMENT")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
        })
    }
}

fn require_env(name: &str) -> StoreResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(StoreError::config(format!("{} must be set", name))),
    }
}

// =============================================================================
// Client
// =============================================================================

/// PocketBase REST API client.
#[derive(Clone)]
pub struct PocketBaseClient {
    http: Client,
    config: PocketBaseConfig,
    base_url: String,
    auth: Arc<AuthSession>,
}

impl PocketBaseClient {
    /// Create a new client. Does not log in; see [`Self::authenticate`].
    pub fn new(config: PocketBaseConfig) -> StoreResult<Self> {
        let parsed = url::Url::parse(&config.base_url)
            .map_err(|e| StoreError::config(format!("invalid POCKETBASE_URL {}: {}", config.base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StoreError::config(format!(
                "POCKETBASE_URL must be http or https, got {}",
                parsed.scheme()
            )));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vnote-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::Network)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: Arc::new(AuthSession::new(config.credentials.clone())),
            config,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(PocketBaseConfig::from_env()?)
    }

    /// Create and log in. Fails if the credentials are rejected.
    pub async fn connect(config: PocketBaseConfig) -> StoreResult<Self> {
        let client = Self::new(config)?;
        client.authenticate().await?;
        Ok(client)
    }

    /// Log in now instead of on the first request.
    pub async fn authenticate(&self) -> StoreResult<()> {
        self.auth.token(&self.http, &self.base_url).await.map(|_| ())
    }

    pub fn config(&self) -> &PocketBaseConfig {
        &self.config
    }

    fn records_url(&self, collection: &str) -> String {
        format!(
            "{}/api/collections/{}/records",
            self.base_url,
            urlencoding::encode(collection)
        )
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.records_url(collection), urlencoding::encode(id))
    }

    fn file_url(&self, collection: &str, id: &str, file_name: &str) -> String {
        format!(
            "{}/api/files/{}/{}/{}",
            self.base_url,
            urlencoding::encode(collection),
            urlencoding::encode(id),
            urlencoding::encode(file_name)
        )
    }

    /// Send an authorized request, logging in again once if the token is rejected.
    async fn send<F>(&self, build: F) -> StoreResult<Response>
    where
        F: Fn() -> StoreResult<RequestBuilder>,
    {
        let token = self.auth.token(&self.http, &self.base_url).await?;
        let response = build()?.header(AUTHORIZATION, &token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("Store rejected token, logging in again");
        self.auth.invalidate().await;
        let token = self.auth.token(&self.http, &self.base_url).await?;
        Ok(build()?.header(AUTHORIZATION, &token).send().await?)
    }

    async fn execute_request<T, F>(
        &self,
        operation: &str,
        collection: &str,
        record_id: Option<&str>,
        fut: F,
    ) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        let span = if let Some(id) = record_id {
            info_span!("store_request", operation = %operation, collection = %collection, record_id = %id)
        } else {
            info_span!("store_request", operation = %operation, collection = %collection)
        };

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn handle_error_response(url: &str, response: Response) -> StoreError {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            if let Some(secs) = after_secs {
                return StoreError::RateLimited(secs.saturating_mul(1000));
            }
        }

        let body = response.text().await.unwrap_or_default();
        StoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }

    async fn read_record(url: &str, response: Response) -> StoreResult<Record> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::handle_error_response(url, response).await);
        }
        let record: Record = response.json().await?;
        Ok(record)
    }

    async fn send_patch(
        &self,
        operation: &str,
        retry: &RetryConfig,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> StoreResult<Record> {
        let url = &self.record_url(collection, id);

        self.execute_request(operation, collection, Some(id), async {
            with_retry(retry, operation, || async move {
                let response = self.send(|| Ok(self.http.patch(url).json(fields))).await?;
                Self::read_record(url, response).await
            })
            .await
        })
        .await
    }

    async fn increment_atomic(&self, collection: &str, id: &str, field: &str, by: i64) -> StoreResult<i64> {
        let mut fields = Fields::new();
        fields.insert(format!("{}+", field), Value::from(by));
        // `field+` is not idempotent: one attempt only
        let record = self
            .send_patch("increment", &RetryConfig::none(), collection, id, &fields)
            .await?;
        record.get_i64(field).ok_or_else(|| {
            StoreError::invalid_response(format!("{} of {}/{} is not a number", field, collection, id))
        })
    }

    async fn increment_read_modify_write(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        by: i64,
    ) -> StoreResult<i64> {
        for attempt in 1..=MAX_INCREMENT_ATTEMPTS {
            let record = self
                .get(collection, id)
                .await?
                .ok_or_else(|| StoreError::not_found(format!("{}/{}", collection, id)))?;

            let current_value = record.get(field).cloned().unwrap_or(Value::Null);
            let current = record.get_i64(field).unwrap_or(0);
            let next = current + by;

            let mut fields = Fields::new();
            fields.insert(field.to_string(), Value::from(next));

            match self
                .patch_if(collection, id, &Precondition::field_equals(field, current_value), fields)
                .await
            {
                Ok(_) => return Ok(next),
                Err(e) if e.is_precondition_failed() => {
                    debug!(collection, id, field, attempt, "Counter changed concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::precondition_failed(format!(
            "{} of {}/{} kept changing after {} attempts",
            field, collection, id, MAX_INCREMENT_ATTEMPTS
        )))
    }
}

fn multipart_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

async fn stream_to_file(response: Response, dest: &Path, max_bytes: u64) -> StoreResult<u64> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(StoreError::PayloadTooLarge {
                size: written,
                limit: max_bytes,
            });
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(written)
}

#[async_trait]
impl RecordStore for PocketBaseClient {
    async fn list(&self, collection: &str, query: &ListQuery) -> StoreResult<ListResponse<Record>> {
        let url = &self.records_url(collection);
        let params = &query.to_params();

        self.execute_request("list", collection, None, async {
            with_retry(&self.config.retry, "list", || async move {
                let response = self.send(|| Ok(self.http.get(url).query(params))).await?;
                if !response.status().is_success() {
                    return Err(Self::handle_error_response(url, response).await);
                }
                let list: ListResponse<Record> = response.json().await?;
                Ok(list)
            })
            .await
        })
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        let url = &self.record_url(collection, id);

        self.execute_request("get", collection, Some(id), async {
            with_retry(&self.config.retry, "get", || async move {
                let response = self.send(|| Ok(self.http.get(url))).await?;
                match response.status() {
                    StatusCode::NOT_FOUND => Ok(None),
                    _ => Self::read_record(url, response).await.map(Some),
                }
            })
            .await
        })
        .await
    }

    async fn create(&self, collection: &str, fields: Fields) -> StoreResult<Record> {
        let url = &self.records_url(collection);

        // Not retried: a retry after a lost response would create a duplicate
        self.execute_request("create", collection, None, async {
            let response = self.send(|| Ok(self.http.post(url).json(&fields))).await?;
            Self::read_record(url, response).await
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let url = &self.record_url(collection, id);

        self.execute_request("delete", collection, Some(id), async {
            with_retry(&self.config.retry, "delete", || async move {
                let response = self.send(|| Ok(self.http.delete(url))).await?;
                match response.status() {
                    StatusCode::NOT_FOUND => Ok(()),
                    status if status.is_success() => Ok(()),
                    _ => Err(Self::handle_error_response(url, response).await),
                }
            })
            .await
        })
        .await
    }

    async fn patch(&self, collection: &str, id: &str, fields: Fields) -> StoreResult<Record> {
        self.send_patch("patch", &self.config.retry, collection, id, &fields)
            .await
    }

    async fn patch_with_file(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        file: &FileUpload,
    ) -> StoreResult<Record> {
        let url = &self.record_url(collection, id);
        let bytes = tokio::fs::read(&file.path).await?;
        let file_name = file.file_name();

        // A multipart form is consumed by the request, so it is rebuilt per send
        let build_form = || -> StoreResult<Form> {
            let part = Part::bytes(bytes.clone())
                .file_name(file_name.clone())
                .mime_str(&file.mime)?;
            let form = fields
                .iter()
                .fold(Form::new(), |form, (key, value)| form.text(key.clone(), multipart_text(value)));
            Ok(form.part(file.field.clone(), part))
        };
        let build_form = &build_form;

        self.execute_request("patch_with_file", collection, Some(id), async {
            with_retry(&self.config.retry, "patch_with_file", || async move {
                let response = self
                    .send(|| Ok(self.http.patch(url).multipart(build_form()?)))
                    .await?;
                Self::read_record(url, response).await
            })
            .await
        })
        .await
    }

    async fn patch_if(
        &self,
        collection: &str,
        id: &str,
        precondition: &Precondition,
        fields: Fields,
    ) -> StoreResult<Record> {
        // PocketBase has no compare-and-set on updates. Check, write, then
        // read back. Two writers can still both pass the check, so this only
        // guards against lost updates that the read-back can see.
        let current = self
            .get(collection, id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("{}/{}", collection, id)))?;

        if !precondition.holds_for(&current) {
            return Err(StoreError::precondition_failed(format!(
                "{}/{}: {} is {}, expected {}",
                collection,
                id,
                precondition.field,
                current.get(&precondition.field).unwrap_or(&Value::Null),
                precondition.equals
            )));
        }

        let written = self.patch(collection, id, fields.clone()).await?;

        let stored = self
            .get(collection, id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("{}/{}", collection, id)))?;

        let overwritten = fields
            .iter()
            .find(|(key, value)| stored.get(key.as_str()) != Some(*value));
        if let Some((key, _)) = overwritten {
            warn!(collection, id, field = %key, "Conditional update was overwritten by a concurrent writer");
            return Err(StoreError::precondition_failed(format!(
                "{}/{}: {} was changed by a concurrent writer",
                collection, id, key
            )));
        }

        Ok(written)
    }

    async fn increment(&self, collection: &str, id: &str, field: &str, by: i64) -> StoreResult<i64> {
        if self.config.atomic_increment {
            self.increment_atomic(collection, id, field, by).await
        } else {
            self.increment_read_modify_write(collection, id, field, by).await
        }
    }

    async fn download_file(
        &self,
        collection: &str,
        id: &str,
        file_name: &str,
        dest: &Path,
        max_bytes: u64,
    ) -> StoreResult<u64> {
        let url = self.file_url(collection, id, file_name);

        self.execute_request("download_file", collection, Some(id), async {
            let response = self.send(|| Ok(self.http.get(&url))).await?;
            if !response.status().is_success() {
                return Err(Self::handle_error_response(&url, response).await);
            }

            let declared = response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(size) = declared {
                if size > max_bytes {
                    return Err(StoreError::PayloadTooLarge { size, limit: max_bytes });
                }
            }

            match stream_to_file(response, dest, max_bytes).await {
                Ok(written) => {
                    record_download(written);
                    debug!(bytes = written, path = %dest.display(), "Downloaded file");
                    Ok(written)
                }
                Err(e) => {
                    if let Err(rm) = tokio::fs::remove_file(dest).await {
                        if rm.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %dest.display(), "Failed to remove partial download: {}", rm);
                        }
                    }
                    Err(e)
                }
            }
        })
        .await
    }
}
