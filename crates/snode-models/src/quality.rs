//! Quality profile configuration.

use serde::{Deserialize, Serialize};

/// One target quality for rendition transcoding.
///
/// The ordered list of profiles is process-wide configuration, read-only
/// after startup; rendition insertion order follows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    /// Quality label, also the output file stem (e.g. "720p")
    pub label: String,
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    /// Target video bitrate (FFmpeg syntax, e.g. "2500k")
    pub video_bitrate: String,
    /// Target audio bitrate
    pub audio_bitrate: String,
}

impl QualityProfile {
    pub fn new(
        label: impl Into<String>,
        width: u32,
        height: u32,
        video_bitrate: impl Into<String>,
        audio_bitrate: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            video_bitrate: video_bitrate.into(),
            audio_bitrate: audio_bitrate.into(),
        }
    }

    /// Resolution in FFmpeg `WxH` form.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Output file name for this profile.
    pub fn output_file_name(&self) -> String {
        format!("{}.mp4", self.label)
    }
}

/// The default quality ladder: 480p, 720p, 1080p.
pub fn default_profiles() -> Vec<QualityProfile> {
    vec![
        QualityProfile::new("480p", 854, 480, "1000k", "128k"),
        QualityProfile::new("720p", 1280, 720, "2500k", "192k"),
        QualityProfile::new("1080p", 1920, 1080, "5000k", "256k"),
    ]
}
