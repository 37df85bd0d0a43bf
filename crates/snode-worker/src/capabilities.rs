//! Capability seams consumed by the pipeline.
//!
//! The worker is built with direct references to its collaborators, each
//! behind a trait so tests can substitute in-memory implementations.
//! Production implementations wrap the concrete clients from the
//! `snode-queue`, `snode-media` and `snode-storage` crates.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use snode_media as media;
use snode_models::{ProgressEvent, QualityProfile, VideoId, VideoRecord};
use snode_queue::{BackoffPolicy, Delivery, ProgressChannel, RedisJobQueue, RedisVideoStore, TranscodeJob};
use snode_storage::S3Client;

use crate::error::WorkerResult;

/// Durable job record store.
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Persist a record snapshot.
    async fn save(&self, record: &VideoRecord) -> WorkerResult<()>;

    /// Fetch a record snapshot.
    async fn find(&self, id: &VideoId) -> WorkerResult<Option<VideoRecord>>;
}

/// Media transform capability: each invocation can fail independently.
#[async_trait]
pub trait MediaTransform: Send + Sync {
    /// Input duration in milliseconds.
    async fn probe_duration_ms(&self, input: &Path) -> WorkerResult<i64>;

    /// Extract one frame at `timestamp_secs` into a fixed-size image.
    async fn extract_thumbnail(
        &self,
        input: &Path,
        output: &Path,
        timestamp_secs: f64,
    ) -> WorkerResult<()>;

    /// Transcode one rendition, publishing stage-local percent (0-100)
    /// on the watch channel as it progresses.
    async fn transcode_rendition(
        &self,
        input: &Path,
        output: &Path,
        profile: &QualityProfile,
        duration_ms: i64,
        progress: watch::Sender<f64>,
    ) -> WorkerResult<()>;
}

/// Object upload capability: local path + key in, public URL out.
#[async_trait]
pub trait ObjectUpload: Send + Sync {
    async fn put(&self, path: &Path, key: &str) -> WorkerResult<String>;
}

/// Notification sink; delivery is best-effort.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn emit(&self, event: &ProgressEvent) -> WorkerResult<()>;
}

/// Job queue as seen by the executor.
#[async_trait]
pub trait TranscodeQueue: Send + Sync {
    async fn enqueue(&self, job: &TranscodeJob) -> WorkerResult<String>;

    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> WorkerResult<Vec<Delivery>>;

    /// Move due backoff-delayed jobs back onto the stream.
    async fn promote_due(&self) -> WorkerResult<usize>;

    async fn ack(&self, message_id: &str) -> WorkerResult<()>;

    async fn schedule_retry(&self, job: &TranscodeJob, delay: Duration) -> WorkerResult<()>;

    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> WorkerResult<Vec<Delivery>>;

    async fn dead_letter(
        &self,
        message_id: &str,
        job: &TranscodeJob,
        error: &str,
    ) -> WorkerResult<()>;

    /// The retry budget and backoff schedule.
    fn backoff(&self) -> &BackoffPolicy;
}

#[async_trait]
impl VideoStore for RedisVideoStore {
    async fn save(&self, record: &VideoRecord) -> WorkerResult<()> {
        RedisVideoStore::save(self, record).await?;
        Ok(())
    }

    async fn find(&self, id: &VideoId) -> WorkerResult<Option<VideoRecord>> {
        Ok(RedisVideoStore::find(self, id).await?)
    }
}

/// FFmpeg-backed media transform.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTransform;

#[async_trait]
impl MediaTransform for FfmpegTransform {
    async fn probe_duration_ms(&self, input: &Path) -> WorkerResult<i64> {
        Ok(media::probe_duration_ms(input).await?)
    }

    async fn extract_thumbnail(
        &self,
        input: &Path,
        output: &Path,
        timestamp_secs: f64,
    ) -> WorkerResult<()> {
        media::extract_thumbnail(input, output, timestamp_secs).await?;
        Ok(())
    }

    async fn transcode_rendition(
        &self,
        input: &Path,
        output: &Path,
        profile: &QualityProfile,
        duration_ms: i64,
        progress: watch::Sender<f64>,
    ) -> WorkerResult<()> {
        media::transcode_rendition(input, output, profile, duration_ms, progress).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectUpload for S3Client {
    async fn put(&self, path: &Path, key: &str) -> WorkerResult<String> {
        Ok(self.upload_file(path, key).await?)
    }
}

#[async_trait]
impl Notify for ProgressChannel {
    async fn emit(&self, event: &ProgressEvent) -> WorkerResult<()> {
        self.publish(event).await?;
        Ok(())
    }
}

#[async_trait]
impl TranscodeQueue for RedisJobQueue {
    async fn enqueue(&self, job: &TranscodeJob) -> WorkerResult<String> {
        Ok(RedisJobQueue::enqueue(self, job).await?)
    }

    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> WorkerResult<Vec<Delivery>> {
        Ok(RedisJobQueue::consume(self, consumer_name, block_ms, count).await?)
    }

    async fn promote_due(&self) -> WorkerResult<usize> {
        Ok(RedisJobQueue::promote_due(self).await?)
    }

    async fn ack(&self, message_id: &str) -> WorkerResult<()> {
        RedisJobQueue::ack(self, message_id).await?;
        Ok(())
    }

    async fn schedule_retry(&self, job: &TranscodeJob, delay: Duration) -> WorkerResult<()> {
        RedisJobQueue::schedule_retry(self, job, delay).await?;
        Ok(())
    }

    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> WorkerResult<Vec<Delivery>> {
        Ok(RedisJobQueue::claim_pending(self, consumer_name, min_idle_ms, count).await?)
    }

    async fn dead_letter(
        &self,
        message_id: &str,
        job: &TranscodeJob,
        error: &str,
    ) -> WorkerResult<()> {
        RedisJobQueue::dead_letter(self, message_id, job, error).await?;
        Ok(())
    }

    fn backoff(&self) -> &BackoffPolicy {
        RedisJobQueue::backoff(self)
    }
}
