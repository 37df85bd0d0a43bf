//! Redis-backed plumbing for the transcoding pipeline.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams with at-least-once delivery
//! - Exponential-backoff delayed redelivery and a dead-letter stream
//! - Progress events via Redis Pub/Sub
//! - The durable video record store (Redis key-value)

pub mod backoff;
pub mod error;
pub mod job;
pub mod progress;
pub mod queue;
pub mod records;

pub use backoff::BackoffPolicy;
pub use error::{QueueError, QueueResult};
pub use job::{Delivery, TranscodeJob};
pub use progress::ProgressChannel;
pub use queue::{QueueConfig, RedisJobQueue};
pub use records::RedisVideoStore;
