//! Overall-progress aggregation and the reporting filter.
//!
//! The pipeline maps stage-local progress into a single 0-100 figure:
//! thumbnail work owns 0-10, the transcode stages split 10-90 evenly,
//! and upload/finalize owns 90-100. Subscribers only ever see the
//! rounded integer value, and only when it strictly increases.

use std::sync::Arc;

use snode_models::{ProgressEvent, VideoId, VideoStatus};

use crate::capabilities::Notify;

/// Progress value after the thumbnail stage.
pub const THUMBNAIL_PROGRESS: f64 = 10.0;

/// Progress value once every rendition is transcoded.
pub const UPLOAD_PROGRESS: f64 = 90.0;

/// Share of overall progress owned by the transcode stages.
pub const TRANSCODE_SHARE: f64 = 80.0;

/// Map stage-local percent (0-100) of transcode stage `stage_index`
/// (0-based, out of `total_stages`) into overall progress.
///
/// Clamped to at most [`UPLOAD_PROGRESS`] so rounding noise from the
/// last stage cannot leapfrog the upload phase.
pub fn overall_progress(stage_index: usize, total_stages: usize, stage_local_pct: f64) -> f64 {
    if total_stages == 0 {
        return THUMBNAIL_PROGRESS;
    }
    let share = TRANSCODE_SHARE / total_stages as f64;
    let base = THUMBNAIL_PROGRESS + stage_index as f64 * share;
    let local = stage_local_pct.clamp(0.0, 100.0);
    (base + local * share / 100.0).min(UPLOAD_PROGRESS)
}

/// Emits progress events for one job, suppressing duplicates.
///
/// Raw progress arrives as `f64`; the event carries the rounded integer.
/// An event is only published when that integer strictly exceeds the
/// last one published, so subscribers see a monotone stream even when
/// the underlying FFmpeg reports jitter.
pub struct ProgressReporter {
    notify: Arc<dyn Notify>,
    video_id: VideoId,
    last_emitted: Option<u8>,
}

impl ProgressReporter {
    pub fn new(notify: Arc<dyn Notify>, video_id: VideoId) -> Self {
        Self {
            notify,
            video_id,
            last_emitted: None,
        }
    }

    /// Publish `progress` if its rounded value is a strict increase.
    pub async fn emit(&mut self, progress: f64, status: VideoStatus) {
        let rounded = progress.round().clamp(0.0, 100.0) as u8;
        if let Some(last) = self.last_emitted {
            if rounded <= last {
                return;
            }
        }
        self.last_emitted = Some(rounded);
        self.send(progress, status).await;
    }

    /// Publish a terminal event regardless of the duplicate filter.
    ///
    /// A failure can land at any progress value, including one already
    /// emitted; the status change still has to reach subscribers.
    pub async fn emit_terminal(&mut self, progress: f64, status: VideoStatus) {
        let rounded = progress.round().clamp(0.0, 100.0) as u8;
        self.last_emitted = Some(rounded);
        self.send(progress, status).await;
    }

    async fn send(&self, progress: f64, status: VideoStatus) {
        let event = ProgressEvent::new(self.video_id.clone(), progress, status);
        if let Err(e) = self.notify.emit(&event).await {
            tracing::warn!(
                video_id = %self.video_id,
                error = %e,
                "failed to publish progress event"
            );
        }
    }
}
