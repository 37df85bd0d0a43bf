//! Encoding constants shared by the media layer.

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "medium";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 23;
/// Streaming-friendly container
pub const OUTPUT_FORMAT: &str = "mp4";
/// Progressive-download layout (moov atom up front)
pub const FASTSTART_FLAGS: &str = "+faststart";

/// Thumbnail dimensions
pub const THUMBNAIL_WIDTH: u32 = 640;
pub const THUMBNAIL_HEIGHT: u32 = 360;
/// Thumbnail file name inside the job work directory
pub const THUMBNAIL_FILE_NAME: &str = "thumbnail.jpg";
