//! Durable video record store (Redis key-value).

use redis::AsyncCommands;
use tracing::debug;

use snode_models::{VideoId, VideoRecord};

use crate::error::QueueResult;

/// Key-value store mapping video id to its record snapshot.
///
/// Only the worker that currently owns a job writes here; concurrent
/// reads (status polling) need no coordination since writes are
/// monotone-progressing and terminal states are stable.
pub struct RedisVideoStore {
    client: redis::Client,
}

impl RedisVideoStore {
    /// Create a new record store.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&redis_url)
    }

    fn key(id: &VideoId) -> String {
        format!("snode:video:{}", id)
    }

    /// Persist a record snapshot.
    pub async fn save(&self, record: &VideoRecord) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(record)?;

        conn.set::<_, _, ()>(Self::key(&record.id), payload).await?;
        debug!(
            "Saved record for video {} (status {})",
            record.id, record.status
        );
        Ok(())
    }

    /// Fetch a record snapshot.
    pub async fn find(&self, id: &VideoId) -> QueueResult<Option<VideoRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(Self::key(id)).await?;

        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key_is_scoped_per_video() {
        let id = VideoId::from_string("abc");
        assert_eq!(RedisVideoStore::key(&id), "snode:video:abc");
    }
}
