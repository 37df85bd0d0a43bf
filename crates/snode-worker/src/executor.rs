//! Job executor: consumes deliveries and runs pipelines under a
//! concurrency limit.
//!
//! A semaphore bounds in-flight pipelines; each spawned pipeline task
//! carries an owned permit. Retry and dead-letter decisions happen
//! here, after the pipeline's verdict: a failed attempt with budget
//! left goes back through the delayed set with exponential backoff, an
//! exhausted one goes to the dead-letter stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};

use snode_queue::Delivery;

use crate::capabilities::TranscodeQueue;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::processor::PipelineContext;

const CONSUME_BLOCK_MS: u64 = 1000;
const CONSUME_BATCH: usize = 5;

pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn TranscodeQueue>,
    ctx: Arc<PipelineContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<dyn TranscodeQueue>, ctx: Arc<PipelineContext>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let consumer_name = format!("worker-{}", uuid::Uuid::new_v4());
        Self {
            config,
            queue,
            ctx,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Signal the run loop to stop accepting new jobs.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Main loop: promote due retries, consume new deliveries, dispatch.
    ///
    /// Returns once shutdown is signalled and in-flight jobs have either
    /// drained or the shutdown timeout elapsed.
    pub async fn run(&self) -> WorkerResult<()> {
        tracing::info!(
            consumer = %self.consumer_name,
            max_jobs = self.config.max_concurrent_jobs,
            "executor started"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut claim_tick = tokio::time::interval(self.config.claim_interval);
        claim_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = claim_tick.tick() => self.claim_orphans().await,
                _ = self.poll_cycle() => {}
            }
        }

        tracing::info!("shutdown requested, draining in-flight jobs");
        self.drain().await;
        Ok(())
    }

    /// One consume cycle: promote due retries, then fetch up to the
    /// available concurrency and dispatch.
    async fn poll_cycle(&self) {
        match self.queue.promote_due().await {
            Ok(promoted) if promoted > 0 => {
                tracing::debug!(promoted, "promoted delayed jobs");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to promote delayed jobs"),
        }

        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // Saturated; back off briefly instead of spinning on consume.
            tokio::time::sleep(Duration::from_millis(100)).await;
            return;
        }

        let count = available.min(CONSUME_BATCH);
        let deliveries = match self
            .queue
            .consume(&self.consumer_name, CONSUME_BLOCK_MS, count)
            .await
        {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::error!(error = %e, "failed to consume from queue");
                tokio::time::sleep(Duration::from_secs(1)).await;
                return;
            }
        };

        for delivery in deliveries {
            self.dispatch(delivery).await;
        }
    }

    /// Claim deliveries stuck pending on dead consumers and dispatch them.
    async fn claim_orphans(&self) {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            return;
        }
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;
        match self
            .queue
            .claim_pending(&self.consumer_name, min_idle_ms, available.min(CONSUME_BATCH))
            .await
        {
            Ok(deliveries) => {
                if !deliveries.is_empty() {
                    tracing::info!(count = deliveries.len(), "claimed orphaned jobs");
                }
                for delivery in deliveries {
                    self.dispatch(delivery).await;
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to claim pending jobs"),
        }
    }

    /// Spawn one pipeline task holding an owned concurrency permit.
    async fn dispatch(&self, delivery: Delivery) {
        let permit = match self.job_semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // semaphore closed, shutting down
        };

        let ctx = self.ctx.clone();
        let queue = self.queue.clone();
        let job_timeout = self.config.job_timeout;
        tokio::spawn(async move {
            Self::execute_job(ctx, queue, job_timeout, delivery).await;
            drop(permit);
        });
    }

    /// Run one delivery to completion on the current task, settling its
    /// ack, retry or dead-letter outcome.
    pub async fn execute_delivery(&self, delivery: Delivery) {
        Self::execute_job(
            self.ctx.clone(),
            self.queue.clone(),
            self.config.job_timeout,
            delivery,
        )
        .await;
    }

    /// Run one pipeline and settle the delivery.
    ///
    /// Success acks. Failure with attempts left schedules a delayed retry
    /// and acks the current delivery; an exhausted job is dead-lettered.
    /// If scheduling the retry itself fails the delivery is left
    /// un-acked, so the pending-claim scan redelivers it later.
    async fn execute_job(
        ctx: Arc<PipelineContext>,
        queue: Arc<dyn TranscodeQueue>,
        job_timeout: Duration,
        delivery: Delivery,
    ) {
        let video_id = delivery.job.video_id.clone();
        let outcome = match tokio::time::timeout(job_timeout, ctx.process_job(&delivery)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::JobTimeout(job_timeout.as_secs())),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = queue.ack(&delivery.message_id).await {
                    tracing::error!(video_id = %video_id, error = %e, "failed to ack completed job");
                }
            }
            Err(job_err) => {
                let job = &delivery.job;
                if job.is_final_attempt() {
                    tracing::error!(
                        video_id = %video_id,
                        attempt = job.attempt,
                        error = %job_err,
                        "attempts exhausted, dead-lettering job"
                    );
                    if let Err(e) = queue
                        .dead_letter(&delivery.message_id, job, &job_err.to_string())
                        .await
                    {
                        tracing::error!(video_id = %video_id, error = %e, "failed to dead-letter job");
                    }
                } else {
                    let delay = queue.backoff().delay_for_attempt(job.attempt);
                    tracing::warn!(
                        video_id = %video_id,
                        attempt = job.attempt,
                        delay_secs = delay.as_secs(),
                        error = %job_err,
                        "job failed, scheduling retry"
                    );
                    match queue.schedule_retry(&job.next_attempt(), delay).await {
                        Ok(()) => {
                            if let Err(e) = queue.ack(&delivery.message_id).await {
                                tracing::error!(video_id = %video_id, error = %e, "failed to ack retried job");
                            }
                        }
                        Err(e) => {
                            // No ack: the delivery stays pending and will be
                            // re-claimed, preserving at-least-once delivery.
                            tracing::error!(video_id = %video_id, error = %e, "failed to schedule retry");
                        }
                    }
                }
            }
        }
    }

    /// Wait for in-flight pipelines by reacquiring every permit, up to
    /// the configured shutdown timeout.
    async fn drain(&self) {
        let all = self.config.max_concurrent_jobs as u32;
        match tokio::time::timeout(
            self.config.shutdown_timeout,
            self.job_semaphore.acquire_many(all),
        )
        .await
        {
            Ok(Ok(_permits)) => tracing::info!("all in-flight jobs drained"),
            Ok(Err(_)) => {}
            Err(_) => {
                let running = all as usize - self.job_semaphore.available_permits();
                tracing::warn!(remaining = running, "shutdown timeout reached with jobs still running");
            }
        }
    }
}
