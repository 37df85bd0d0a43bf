//! Video record model and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a video transcoding job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video processing status.
///
/// Transitions only along `Pending -> Processing -> {Completed, Failed}`.
/// A retried job re-enters `Processing` on each redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Waiting in the queue, set at submission
    #[default]
    Pending,
    /// A worker is driving the pipeline
    Processing,
    /// All renditions transcoded and uploaded
    Completed,
    /// A fatal pipeline fault occurred
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One transcoded output at a specific quality profile.
///
/// `url` stays `None` until the object-storage upload succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rendition {
    /// Quality label (e.g. "720p")
    pub quality: String,
    /// Local output path
    pub path: PathBuf,
    /// Public URL, set after upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Output size in bytes
    pub size: u64,
}

impl Rendition {
    /// Create a rendition entry for a freshly transcoded output.
    pub fn new(quality: impl Into<String>, path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            quality: quality.into(),
            path: path.into(),
            url: None,
            size,
        }
    }
}

/// The durable record for one submitted video.
///
/// The worker is the sole mutator of `status`, `progress`, `thumbnail_*`,
/// `renditions` and `error_message` between enqueue and a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Unique video ID, assigned at submission
    pub id: VideoId,
    /// Original file name as uploaded
    pub original_file_name: String,
    /// Path to the stored input file
    pub original_file_path: PathBuf,
    /// Input size in bytes
    pub original_file_size: u64,
    /// Current lifecycle state
    #[serde(default)]
    pub status: VideoStatus,
    /// Overall progress in [0, 100], full precision
    #[serde(default)]
    pub progress: f64,
    /// Local thumbnail path, if extraction succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,
    /// Uploaded thumbnail URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Transcoded outputs in configured profile order
    #[serde(default)]
    pub renditions: Vec<Rendition>,
    /// Failure cause, set only on `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Refreshed on every state mutation
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Create a new pending record for an uploaded file.
    pub fn new(
        id: VideoId,
        original_file_name: impl Into<String>,
        original_file_path: impl Into<PathBuf>,
        original_file_size: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            original_file_name: original_file_name.into(),
            original_file_path: original_file_path.into(),
            original_file_size,
            status: VideoStatus::Pending,
            progress: 0.0,
            thumbnail_path: None,
            thumbnail_url: None,
            renditions: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enter the `Processing` state, resetting progress to 0.
    ///
    /// Called once per dispatch attempt; a redelivered job re-enters
    /// `Processing` here even if a previous attempt left it `Failed`.
    pub fn begin_processing(&mut self) {
        self.status = VideoStatus::Processing;
        self.progress = 0.0;
        self.error_message = None;
        self.renditions.clear();
        self.updated_at = Utc::now();
    }

    /// Advance progress. Non-increasing values are ignored so the stored
    /// value is monotone within a single `Processing` episode.
    pub fn set_progress(&mut self, pct: f64) {
        let pct = pct.clamp(0.0, 100.0);
        if pct > self.progress {
            self.progress = pct;
            self.updated_at = Utc::now();
        }
    }

    /// Mark the job completed, forcing progress to 100.
    pub fn complete(&mut self) {
        self.status = VideoStatus::Completed;
        self.progress = 100.0;
        self.updated_at = Utc::now();
    }

    /// Mark the job failed with an error message. Progress is left at its
    /// last value; it is not meaningful to consumers in this state.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = VideoStatus::Failed;
        self.error_message = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Check if the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VideoRecord {
        VideoRecord::new(VideoId::new(), "clip.mov", "/tmp/uploads/clip.mov", 1024)
    }

    #[test]
    fn new_record_is_pending_at_zero() {
        let r = record();
        assert_eq!(r.status, VideoStatus::Pending);
        assert_eq!(r.progress, 0.0);
        assert!(r.renditions.is_empty());
        assert!(!r.is_terminal());
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut r = record();
        r.begin_processing();
        assert_eq!(r.status, VideoStatus::Processing);
        assert_eq!(r.progress, 0.0);

        r.set_progress(10.0);
        r.set_progress(50.0);
        assert_eq!(r.progress, 50.0);

        r.complete();
        assert_eq!(r.status, VideoStatus::Completed);
        assert_eq!(r.progress, 100.0);
        assert!(r.is_terminal());
    }

    #[test]
    fn progress_is_monotone_within_episode() {
        let mut r = record();
        r.begin_processing();
        r.set_progress(40.0);
        r.set_progress(25.0);
        assert_eq!(r.progress, 40.0);
        r.set_progress(41.5);
        assert_eq!(r.progress, 41.5);
    }

    #[test]
    fn redelivery_resets_progress_and_error() {
        let mut r = record();
        r.begin_processing();
        r.set_progress(60.0);
        r.fail("transcode failed: 720p");
        assert_eq!(r.status, VideoStatus::Failed);
        assert_eq!(r.error_message.as_deref(), Some("transcode failed: 720p"));
        // Failure leaves progress at its last value
        assert_eq!(r.progress, 60.0);

        r.begin_processing();
        assert_eq!(r.status, VideoStatus::Processing);
        assert_eq!(r.progress, 0.0);
        assert!(r.error_message.is_none());
        assert!(r.renditions.is_empty());
    }

    #[test]
    fn record_serde_roundtrip() {
        let mut r = record();
        r.begin_processing();
        r.thumbnail_path = Some(PathBuf::from("/tmp/output/x/thumbnail.jpg"));
        r.renditions
            .push(Rendition::new("480p", "/tmp/output/x/480p.mp4", 2048));

        let json = serde_json::to_string(&r).expect("serialize record");
        let decoded: VideoRecord = serde_json::from_str(&json).expect("deserialize record");
        assert_eq!(decoded.id, r.id);
        assert_eq!(decoded.status, VideoStatus::Processing);
        assert_eq!(decoded.renditions.len(), 1);
        assert_eq!(decoded.renditions[0].quality, "480p");
        assert!(decoded.renditions[0].url.is_none());
    }
}
