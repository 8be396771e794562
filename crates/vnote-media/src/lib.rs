//! FFmpeg CLI wrapper for producing video notes.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - A runner with timeout that keeps FFmpeg's diagnostic output
//! - The [`MediaTransform`] seam and its FFmpeg video-note implementation

pub mod command;
pub mod error;
pub mod progress;
pub mod transform;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use progress::FfmpegProgress;
pub use transform::{FfmpegTransform, MediaTransform, VideoNoteParams};
