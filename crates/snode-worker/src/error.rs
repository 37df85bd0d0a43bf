//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job record not found: {0}")]
    JobNotFound(String),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Job timed out after {0} seconds")]
    JobTimeout(u64),

    #[error("Media error: {0}")]
    Media(#[from] snode_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] snode_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] snode_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn transcode_failed(msg: impl Into<String>) -> Self {
        Self::TranscodeFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }
}
