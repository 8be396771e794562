//! Video-note transform.
//!
//! Produces a square, 512x512, at most 60 second H.264 clip from any input
//! FFmpeg can decode. The crop keeps the center of the frame.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Turns an input media file into an output media file.
#[async_trait]
pub trait MediaTransform: Send + Sync {
    /// Transform `input` into `output`. The output must exist and be
    /// non-empty when this returns `Ok`.
    async fn transform(&self, input: &Path, output: &Path) -> MediaResult<()>;
}

/// Encoding parameters of a video note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoNoteParams {
    /// Width and height in pixels
    pub size: u32,
    pub max_duration_secs: u32,
    pub fps: u32,
    pub codec: String,
    pub preset: String,
    pub crf: u8,
}

impl Default for VideoNoteParams {
    fn default() -> Self {
        Self {
            size: 512,
            max_duration_secs: 60,
            fps: 30,
            codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 23,
        }
    }
}

impl VideoNoteParams {
    /// Center square crop followed by a scale to `size`.
    ///
    /// Commas inside the expressions are escaped for the filtergraph parser.
    pub fn filter(&self) -> String {
        let side = r"min(iw\,ih)";
        format!(
            "crop={side}:{side}:(iw-{side})/2:(ih-{side})/2,scale={size}:{size}",
            side = side,
            size = self.size
        )
    }

    pub fn command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .video_filter(self.filter())
            .frame_rate(self.fps)
            .max_duration(self.max_duration_secs)
            .video_codec(self.codec.clone())
            .preset(self.preset.clone())
            .crf(self.crf)
    }
}

/// [`MediaTransform`] backed by the FFmpeg CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTransform {
    params: VideoNoteParams,
    runner: FfmpegRunner,
}

impl FfmpegTransform {
    pub fn new(params: VideoNoteParams) -> Self {
        Self {
            params,
            runner: FfmpegRunner::new(),
        }
    }

    /// Kill FFmpeg if a transform takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.runner = self.runner.with_timeout(timeout);
        self
    }

    /// Use a specific FFmpeg executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.runner = self.runner.with_program(program);
        self
    }

    pub fn params(&self) -> &VideoNoteParams {
        &self.params
    }
}

#[async_trait]
impl MediaTransform for FfmpegTransform {
    async fn transform(&self, input: &Path, output: &Path) -> MediaResult<()> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }

        let cmd = self.params.command(input, output);
        let total_ms = i64::from(self.params.max_duration_secs) * 1000;
        let start = Instant::now();

        let result = self
            .runner
            .run_with_progress(&cmd, move |progress| {
                debug!(
                    frame = progress.frame,
                    percent = progress.percentage(total_ms),
                    speed = progress.speed,
                    "FFmpeg progress"
                );
            })
            .await;

        histogram!("vnote_media_transform_seconds").record(start.elapsed().as_secs_f64());
        if let Err(e) = result {
            counter!("vnote_media_transform_failures_total").increment(1);
            return Err(e);
        }

        let size = match tokio::fs::metadata(cmd.output()).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if size == 0 {
            counter!("vnote_media_transform_failures_total").increment(1);
            return Err(MediaError::ffmpeg_failed(
                format!("FFmpeg produced no output at {}", output.display()),
                None,
                Some(0),
            ));
        }

        info!(
            output = %output.display(),
            bytes = size,
            duration_ms = start.elapsed().as_millis() as u64,
            "Video note encoded"
        );
        Ok(())
    }
}
