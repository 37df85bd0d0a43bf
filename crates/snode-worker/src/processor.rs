//! The transcoding pipeline for a single job.
//!
//! Stages run in order: thumbnail (non-fatal), one transcode per quality
//! profile (fatal), upload (fatal), finalize, local cleanup. The record
//! is persisted at every stage boundary so a crash mid-pipeline leaves
//! an accurate snapshot behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use snode_models::encoding::THUMBNAIL_FILE_NAME;
use snode_models::{Rendition, VideoRecord, VideoStatus};
use snode_queue::Delivery;

use crate::capabilities::{MediaTransform, Notify, ObjectUpload, VideoStore};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::progress::{overall_progress, ProgressReporter, THUMBNAIL_PROGRESS, UPLOAD_PROGRESS};

/// Everything the pipeline needs to process one job.
pub struct PipelineContext {
    pub config: WorkerConfig,
    pub store: Arc<dyn VideoStore>,
    pub transform: Arc<dyn MediaTransform>,
    pub upload: Arc<dyn ObjectUpload>,
    pub notify: Arc<dyn Notify>,
}

impl PipelineContext {
    /// Per-job scratch directory under the configured output root.
    pub fn work_dir(&self, record: &VideoRecord) -> PathBuf {
        self.config.output_dir.join(record.id.as_str())
    }

    /// Run the pipeline for one delivered job.
    ///
    /// A missing record fails the attempt like any pipeline fault; a
    /// delivery racing ahead of record persistence gets another chance
    /// on the retry schedule.
    pub async fn process_job(&self, delivery: &Delivery) -> WorkerResult<()> {
        let job = &delivery.job;
        let logger = JobLogger::new(&job.video_id, "transcode");
        logger.log_start(&format!(
            "picked up job (attempt {}/{})",
            job.attempt, job.max_attempts
        ));

        let mut record = self
            .store
            .find(&job.video_id)
            .await?
            .ok_or_else(|| WorkerError::job_not_found(job.video_id.as_str()))?;

        let mut reporter = ProgressReporter::new(self.notify.clone(), record.id.clone());

        match self.run_pipeline(&mut record, &mut reporter, &logger).await {
            Ok(()) => {
                logger.log_completion("job completed");
                Ok(())
            }
            Err(e) => {
                logger.log_error(&format!("job failed: {e}"));
                record.fail(e.to_string());
                if let Err(save_err) = self.store.save(&record).await {
                    logger.log_error(&format!("failed to persist failure state: {save_err}"));
                }
                reporter
                    .emit_terminal(record.progress, VideoStatus::Failed)
                    .await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        record: &mut VideoRecord,
        reporter: &mut ProgressReporter,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        record.begin_processing();
        self.store.save(record).await?;
        reporter.emit(0.0, VideoStatus::Processing).await;

        let work_dir = self.work_dir(record);
        tokio::fs::create_dir_all(&work_dir).await?;

        let input = record.original_file_path.clone();
        let duration_ms = self.transform.probe_duration_ms(&input).await?;
        logger.log_progress(&format!("probed input, duration {duration_ms}ms"));

        // Thumbnail failure degrades the output, it never fails the job.
        let thumbnail_path = work_dir.join(THUMBNAIL_FILE_NAME);
        let midpoint_secs = duration_ms as f64 / 2000.0;
        match self
            .transform
            .extract_thumbnail(&input, &thumbnail_path, midpoint_secs)
            .await
        {
            Ok(()) => {
                record.thumbnail_path = Some(thumbnail_path);
                logger.log_progress("thumbnail extracted");
            }
            Err(e) => {
                logger.log_warning(&format!("thumbnail extraction failed, continuing: {e}"));
            }
        }

        record.set_progress(THUMBNAIL_PROGRESS);
        self.store.save(record).await?;
        reporter.emit(THUMBNAIL_PROGRESS, VideoStatus::Processing).await;

        let profiles = self.config.quality_profiles.clone();
        let total = profiles.len();
        for (index, profile) in profiles.iter().enumerate() {
            let output = work_dir.join(profile.output_file_name());
            logger.log_progress(&format!(
                "transcoding {} ({})",
                profile.label,
                profile.resolution()
            ));

            let (tx, mut rx) = watch::channel(0.0f64);
            let transcode = self
                .transform
                .transcode_rendition(&input, &output, profile, duration_ms, tx);
            tokio::pin!(transcode);

            // Drain stage-local progress while the transcode runs; the
            // channel closes when the sender is dropped inside the stage.
            let mut channel_open = true;
            let result = loop {
                tokio::select! {
                    res = &mut transcode => break res,
                    changed = rx.changed(), if channel_open => {
                        if changed.is_ok() {
                            let local = *rx.borrow_and_update();
                            let overall = overall_progress(index, total, local);
                            record.set_progress(overall);
                            reporter.emit(overall, VideoStatus::Processing).await;
                        } else {
                            channel_open = false;
                        }
                    }
                }
            };
            result.map_err(|e| {
                WorkerError::transcode_failed(format!("{}: {e}", profile.label))
            })?;

            let size = tokio::fs::metadata(&output).await?.len();
            record
                .renditions
                .push(Rendition::new(profile.label.clone(), &output, size));

            let boundary = overall_progress(index, total, 100.0);
            record.set_progress(boundary);
            self.store.save(record).await?;
            reporter.emit(boundary, VideoStatus::Processing).await;
            logger.log_progress(&format!("{} done ({size} bytes)", profile.label));
        }

        record.set_progress(UPLOAD_PROGRESS);
        self.store.save(record).await?;
        reporter.emit(UPLOAD_PROGRESS, VideoStatus::Processing).await;

        // Upload everything first; URLs land on the record only once the
        // whole batch has succeeded, so a partial upload never publishes
        // half-reachable output.
        let key_prefix = format!("videos/{}", record.id);
        let mut thumbnail_url = None;
        if let Some(path) = record.thumbnail_path.clone() {
            let key = format!("{key_prefix}/{THUMBNAIL_FILE_NAME}");
            let url = self
                .upload
                .put(&path, &key)
                .await
                .map_err(|e| WorkerError::upload_failed(format!("thumbnail: {e}")))?;
            logger.log_progress("thumbnail uploaded");
            thumbnail_url = Some(url);
        }

        let mut rendition_urls = Vec::with_capacity(record.renditions.len());
        for rendition in &record.renditions {
            let file_name = rendition
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.mp4", rendition.quality));
            let key = format!("{key_prefix}/{file_name}");
            let url = self
                .upload
                .put(&rendition.path, &key)
                .await
                .map_err(|e| WorkerError::upload_failed(format!("{}: {e}", rendition.quality)))?;
            logger.log_progress(&format!("{} uploaded", rendition.quality));
            rendition_urls.push(url);
        }

        record.thumbnail_url = thumbnail_url;
        for (rendition, url) in record.renditions.iter_mut().zip(rendition_urls) {
            rendition.url = Some(url);
        }
        record.complete();
        self.store.save(record).await?;
        reporter.emit(100.0, VideoStatus::Completed).await;

        if let Err(e) = cleanup_local_files(record, &work_dir).await {
            logger.log_warning(&format!("cleanup failed, leaving local files: {e}"));
        }

        Ok(())
    }
}

/// Remove the local artifacts of a successfully processed job.
///
/// Idempotent: already-removed paths are not errors. Only invoked after
/// a successful upload; failed jobs keep their artifacts for retries.
pub async fn cleanup_local_files(record: &VideoRecord, work_dir: &Path) -> WorkerResult<()> {
    remove_file_if_exists(&record.original_file_path).await?;
    if let Some(path) = &record.thumbnail_path {
        remove_file_if_exists(path).await?;
    }
    for rendition in &record.renditions {
        remove_file_if_exists(&rendition.path).await?;
    }
    match tokio::fs::remove_dir(work_dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        // Leftover files from an unrelated writer; leave the directory.
        Err(e) if e.kind() == std::io::ErrorKind::DirectoryNotEmpty => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn remove_file_if_exists(path: &Path) -> WorkerResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
