//! Shared data models for the StreamNode transcoder.
//!
//! This crate provides Serde-serializable types for:
//! - Video records and their lifecycle states
//! - Transcoded renditions
//! - Quality profiles and encoding configuration
//! - Progress events emitted to the notification sink

pub mod encoding;
pub mod event;
pub mod quality;
pub mod video;

// Re-export common types
pub use event::ProgressEvent;
pub use quality::QualityProfile;
pub use video::{Rendition, VideoId, VideoRecord, VideoStatus};
