//! Job payloads for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use snode_models::VideoId;

/// A transcoding job as carried on the wire.
///
/// The payload holds its own attempt bookkeeping so a redelivered copy
/// knows where it stands against the retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeJob {
    /// Video record this job processes
    pub video_id: VideoId,
    /// Delivery attempt, 1-based
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    /// Maximum attempts before dead-lettering
    pub max_attempts: u32,
    /// When the job was first enqueued
    pub enqueued_at: DateTime<Utc>,
}

fn default_attempt() -> u32 {
    1
}

impl TranscodeJob {
    /// Create a first-attempt job.
    pub fn new(video_id: VideoId, max_attempts: u32) -> Self {
        Self {
            video_id,
            attempt: 1,
            max_attempts,
            enqueued_at: Utc::now(),
        }
    }

    /// The payload for the next redelivery of this job.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// True when the retry budget is exhausted.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// One delivered queue message: the payload plus the stream message id
/// needed for acknowledgment.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stream message id (XACK handle)
    pub message_id: String,
    /// The job payload
    pub job: TranscodeJob,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_bookkeeping() {
        let job = TranscodeJob::new(VideoId::new(), 3);
        assert_eq!(job.attempt, 1);
        assert!(!job.is_final_attempt());

        let second = job.next_attempt();
        assert_eq!(second.attempt, 2);
        assert_eq!(second.video_id, job.video_id);
        assert_eq!(second.enqueued_at, job.enqueued_at);

        let third = second.next_attempt();
        assert!(third.is_final_attempt());
    }

    #[test]
    fn job_serde_roundtrip() {
        let job = TranscodeJob::new(VideoId::from_string("vid-1"), 3);
        let json = serde_json::to_string(&job).expect("serialize job");
        let decoded: TranscodeJob = serde_json::from_str(&json).expect("deserialize job");
        assert_eq!(decoded.video_id, job.video_id);
        assert_eq!(decoded.attempt, 1);
        assert_eq!(decoded.max_attempts, 3);
    }

    #[test]
    fn missing_attempt_defaults_to_first() {
        let json = r#"{"video_id":"vid-1","max_attempts":3,"enqueued_at":"2026-01-01T00:00:00Z"}"#;
        let decoded: TranscodeJob = serde_json::from_str(json).expect("deserialize job");
        assert_eq!(decoded.attempt, 1);
    }
}
