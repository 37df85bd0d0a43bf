//! Transcoding worker: consumes jobs from the queue and runs the
//! thumbnail / transcode / upload pipeline under a concurrency limit.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod processor;
pub mod progress;

pub use capabilities::{
    FfmpegTransform, MediaTransform, Notify, ObjectUpload, TranscodeQueue, VideoStore,
};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use processor::{cleanup_local_files, PipelineContext};
pub use progress::{overall_progress, ProgressReporter};
