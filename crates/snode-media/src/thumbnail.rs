//! Thumbnail extraction.

use std::path::Path;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use snode_models::encoding::{THUMBNAIL_HEIGHT, THUMBNAIL_WIDTH};

/// Extract a single frame at `timestamp_secs` into a fixed-size JPEG.
///
/// Callers pass the file midpoint; failure here is non-fatal to the
/// pipeline and is handled by the worker.
pub async fn extract_thumbnail(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    timestamp_secs: f64,
) -> MediaResult<()> {
    let filter = format!("scale={}:{}", THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT);

    let cmd = FfmpegCommand::new(input.as_ref(), output.as_ref())
        .seek(timestamp_secs.max(0.0))
        .single_frame()
        .video_filter(filter)
        .log_level("error");

    FfmpegRunner::new().run(&cmd).await
}
