//! FFmpeg CLI wrapper for video transcoding.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Duration probing via ffprobe
//! - Thumbnail extraction and quality-profile transcoding

pub mod command;
pub mod error;
pub mod probe;
pub mod progress;
pub mod thumbnail;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::probe_duration_ms;
pub use progress::FfmpegProgress;
pub use thumbnail::extract_thumbnail;
pub use transcode::transcode_rendition;
