//! Job queue using Redis Streams.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{QueueError, QueueResult};
use crate::job::{Delivery, TranscodeJob};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Sorted set holding backoff-delayed redeliveries
    pub delayed_set_name: String,
    /// Retry budget and backoff schedule
    pub backoff: BackoffPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "snode:transcode".to_string(),
            consumer_group: "snode:workers".to_string(),
            dlq_stream_name: "snode:dlq".to_string(),
            delayed_set_name: "snode:delayed".to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| defaults.redis_url.clone()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| defaults.stream_name.clone()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| defaults.consumer_group.clone()),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or_else(|_| defaults.dlq_stream_name.clone()),
            delayed_set_name: std::env::var("QUEUE_DELAYED_SET")
                .unwrap_or_else(|_| defaults.delayed_set_name.clone()),
            backoff: BackoffPolicy::default()
                .with_max_attempts(
                    std::env::var("QUEUE_MAX_ATTEMPTS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(defaults.backoff.max_attempts),
                )
                .with_base_delay(Duration::from_secs(
                    std::env::var("QUEUE_BACKOFF_BASE_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(defaults.backoff.base_delay.as_secs()),
                )),
        }
    }
}

/// Job queue client.
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// The configured retry policy.
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.config.backoff
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a job for immediate delivery.
    pub async fn enqueue(&self, job: &TranscodeJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let message_id = self.xadd(&mut conn, job).await?;

        info!(
            "Enqueued job for video {} (attempt {}) with message ID {}",
            job.video_id, job.attempt, message_id
        );

        Ok(message_id)
    }

    async fn xadd(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &TranscodeJob,
    ) -> QueueResult<String> {
        let payload = serde_json::to_string(job)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(conn)
            .await?;

        Ok(message_id)
    }

    /// Park a failed job for redelivery after `delay`.
    ///
    /// The caller passes the payload for the next attempt; the original
    /// message must be acknowledged separately.
    pub async fn schedule_retry(&self, job: &TranscodeJob, delay: Duration) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;
        let due_at_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        conn.zadd::<_, _, _, ()>(&self.config.delayed_set_name, &payload, due_at_ms)
            .await?;

        info!(
            "Scheduled retry for video {} (attempt {}) in {:?}",
            job.video_id, job.attempt, delay
        );
        Ok(())
    }

    /// Move due delayed jobs back onto the stream.
    ///
    /// ZREM gates promotion so concurrent workers never double-promote
    /// the same entry. Returns the number of promoted jobs.
    pub async fn promote_due(&self) -> QueueResult<usize> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let now_ms = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(&self.config.delayed_set_name, "-inf", now_ms, 0, 16)
            .await?;

        let mut promoted = 0;
        for payload in due {
            let removed: usize = conn.zrem(&self.config.delayed_set_name, &payload).await?;
            if removed == 0 {
                continue;
            }

            match serde_json::from_str::<TranscodeJob>(&payload) {
                Ok(job) => {
                    self.xadd(&mut conn, &job).await?;
                    debug!(
                        "Promoted delayed job for video {} (attempt {})",
                        job.video_id, job.attempt
                    );
                    promoted += 1;
                }
                Err(e) => {
                    warn!("Dropping malformed delayed payload: {}", e);
                }
            }
        }

        Ok(promoted)
    }

    /// Acknowledge a job (definitive outcome reached).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue after exhausted retries.
    pub async fn dead_letter(
        &self,
        message_id: &str,
        job: &TranscodeJob,
        error: &str,
    ) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!(
            "Moved job for video {} to DLQ after {} attempts: {}",
            job.video_id, job.attempt, error
        );
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Consume jobs from the queue.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();

        for stream_key in result.keys {
            for entry in stream_key.ids {
                let message_id = entry.id.clone();

                if let Some(redis::Value::BulkString(payload)) = entry.map.get("job") {
                    let payload_str = String::from_utf8_lossy(payload);
                    match serde_json::from_str::<TranscodeJob>(&payload_str) {
                        Ok(job) => {
                            debug!("Consumed job for video {} from stream", job.video_id);
                            deliveries.push(Delivery { message_id, job });
                        }
                        Err(e) => {
                            warn!("Failed to parse job payload: {}", e);
                            // Ack the malformed message to prevent reprocessing
                            self.ack(&message_id).await.ok();
                        }
                    }
                }
            }
        }

        Ok(deliveries)
    }

    /// Claim pending jobs that have been idle for too long.
    /// This handles jobs from crashed workers (at-least-once delivery).
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;

        if pending.count() == 0 {
            return Ok(Vec::new());
        }

        let result: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();

        for entry in result.ids {
            let message_id = entry.id.clone();

            if let Some(redis::Value::BulkString(payload)) = entry.map.get("job") {
                let payload_str = String::from_utf8_lossy(payload);
                match serde_json::from_str::<TranscodeJob>(&payload_str) {
                    Ok(job) => {
                        info!("Claimed pending job for video {}", job.video_id);
                        deliveries.push(Delivery { message_id, job });
                    }
                    Err(e) => {
                        warn!("Failed to parse claimed job payload: {}", e);
                        self.ack(&message_id).await.ok();
                    }
                }
            }
        }

        Ok(deliveries)
    }
}
