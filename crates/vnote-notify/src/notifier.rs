use std::path::Path;

use async_trait::async_trait;

use crate::error::NotifyResult;

/// Sends a media file to a chat as a video note.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_video_note(&self, chat_id: i64, path: &Path) -> NotifyResult<()>;
}
