//! Progress events emitted to the notification sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::video::{VideoId, VideoStatus};

/// One progress notification for a job.
///
/// The stored record keeps full-precision progress; only whole-number
/// values cross the notification boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Job this event belongs to
    pub video_id: VideoId,
    /// Rounded progress percentage in [0, 100]
    pub progress: u8,
    /// Status at the time of emission
    pub status: VideoStatus,
    /// Emission timestamp
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Build an event, rounding progress to integer percent.
    pub fn new(video_id: VideoId, progress: f64, status: VideoStatus) -> Self {
        Self {
            video_id,
            progress: progress.round().clamp(0.0, 100.0) as u8,
            status,
            timestamp: Utc::now(),
        }
    }
}
