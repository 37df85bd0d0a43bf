//! Transcoding worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use snode_queue::{ProgressChannel, RedisJobQueue, RedisVideoStore};
use snode_storage::S3Client;
use snode_worker::{FfmpegTransform, JobExecutor, PipelineContext, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("snode=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting snode-worker");

    if let Err(e) = snode_media::check_ffmpeg() {
        error!("FFmpeg check failed: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = snode_media::check_ffprobe() {
        error!("ffprobe check failed: {}", e);
        std::process::exit(1);
    }

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let queue = match RedisJobQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.init().await {
        error!("Failed to initialize queue consumer group: {}", e);
        std::process::exit(1);
    }

    let store = match RedisVideoStore::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create video store: {}", e);
            std::process::exit(1);
        }
    };

    let progress = match ProgressChannel::from_env() {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create progress channel: {}", e);
            std::process::exit(1);
        }
    };

    let storage = match S3Client::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create storage client: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = Arc::new(PipelineContext {
        config: config.clone(),
        store: Arc::new(store),
        transform: Arc::new(FfmpegTransform),
        upload: Arc::new(storage),
        notify: Arc::new(progress),
    });

    let executor = Arc::new(JobExecutor::new(config, Arc::new(queue), ctx));

    // Ctrl-C triggers a graceful drain
    let signal_executor = executor.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
