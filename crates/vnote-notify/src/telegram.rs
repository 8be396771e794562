//! Telegram Bot API client for `sendVideoNote`.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, info_span, Instrument};

use crate::error::{NotifyError, NotifyResult};
use crate::notifier::Notifier;

/// Default Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Telegram client configuration.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather
    pub token: String,
    /// API endpoint, overridable for a local Bot API server
    pub api_url: String,
    /// Request timeout, covers the upload
    pub timeout: Duration,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TelegramConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> NotifyResult<Self> {
        let token = std::env::var("TELEGRAM_APITOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| NotifyError::config("TELEGRAM_APITOKEN must be set"))?;

        let timeout_secs: u64 = std::env::var("TELEGRAM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            token,
            api_url: std::env::var("TELEGRAM_API")
                .ok()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// [`Notifier`] that sends video notes through the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramNotifier {
    http: Client,
    method_url: String,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> NotifyResult<Self> {
        url::Url::parse(&config.api_url)
            .map_err(|e| NotifyError::config(format!("invalid TELEGRAM_API {}: {}", config.api_url, e)))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("vnote-notify/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            method_url: format!(
                "{}/bot{}/sendVideoNote",
                config.api_url.trim_end_matches('/'),
                config.token
            ),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> NotifyResult<Self> {
        Self::new(TelegramConfig::from_env()?)
    }

    async fn send(&self, chat_id: i64, path: &Path) -> NotifyResult<()> {
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video_note.mp4".to_string());
        let size = content.len();

        let part = Part::bytes(content).file_name(file_name).mime_str("video/mp4")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("video_note", part);

        debug!(chat_id, bytes = size, "Sending video note");

        // The method URL embeds the bot token, keep it out of errors
        let response = self
            .http
            .post(&self.method_url)
            .multipart(form)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        let body = response.text().await.map_err(reqwest::Error::without_url)?;
        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(api) if status.is_success() && api.ok => Ok(()),
            Some(api) => Err(NotifyError::api(
                status.as_u16(),
                api.description.unwrap_or_else(|| "ok is false".to_string()),
            )),
            None if status.is_success() => Err(NotifyError::InvalidResponse(format!(
                "undecodable body: {}",
                body
            ))),
            None => Err(NotifyError::api(status.as_u16(), body)),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_video_note(&self, chat_id: i64, path: &Path) -> NotifyResult<()> {
        if chat_id == 0 {
            return Err(NotifyError::InvalidRecipient(chat_id));
        }

        let span = info_span!("telegram_request", method = "sendVideoNote", chat_id);
        let start = Instant::now();
        let result = self.send(chat_id, path).instrument(span).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!("vnote_notify_requests_total", "outcome" => outcome).increment(1);
        histogram!("vnote_notify_latency_seconds").record(start.elapsed().as_secs_f64());

        if result.is_ok() {
            info!(chat_id, "Video note delivered");
        }
        result
    }
}
