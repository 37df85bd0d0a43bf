//! Pipeline and executor tests against in-memory collaborators.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use snode_models::{ProgressEvent, QualityProfile, VideoId, VideoRecord, VideoStatus};
use snode_queue::{BackoffPolicy, Delivery, TranscodeJob};
use snode_worker::processor::cleanup_local_files;
use snode_worker::{
    JobExecutor, MediaTransform, Notify, ObjectUpload, PipelineContext, TranscodeQueue,
    VideoStore, WorkerConfig, WorkerError, WorkerResult,
};

const TEST_DURATION_MS: i64 = 10_000;

// ---------------------------------------------------------------------------
// In-memory collaborators

#[derive(Default)]
struct InMemoryStore {
    records: Mutex<HashMap<String, VideoRecord>>,
    /// (status, progress) at every save, in order
    snapshots: Mutex<Vec<(VideoStatus, f64)>>,
}

impl InMemoryStore {
    fn insert(&self, record: VideoRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.id.as_str().to_string(), record);
    }

    fn get(&self, id: &VideoId) -> Option<VideoRecord> {
        self.records.lock().unwrap().get(id.as_str()).cloned()
    }
}

#[async_trait]
impl VideoStore for InMemoryStore {
    async fn save(&self, record: &VideoRecord) -> WorkerResult<()> {
        self.snapshots
            .lock()
            .unwrap()
            .push((record.status, record.progress));
        self.records
            .lock()
            .unwrap()
            .insert(record.id.as_str().to_string(), record.clone());
        Ok(())
    }

    async fn find(&self, id: &VideoId) -> WorkerResult<Option<VideoRecord>> {
        Ok(self.get(id))
    }
}

#[derive(Default)]
struct FakeTransform {
    thumbnail_fails: bool,
    /// Quality label whose transcode should fail
    fail_on_label: Option<String>,
    /// Per-rendition artificial latency
    rendition_delay: Duration,
    current: AtomicI64,
    max_observed: AtomicI64,
}

impl FakeTransform {
    fn max_concurrent(&self) -> i64 {
        self.max_observed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransform for FakeTransform {
    async fn probe_duration_ms(&self, _input: &Path) -> WorkerResult<i64> {
        Ok(TEST_DURATION_MS)
    }

    async fn extract_thumbnail(
        &self,
        _input: &Path,
        output: &Path,
        _timestamp_secs: f64,
    ) -> WorkerResult<()> {
        if self.thumbnail_fails {
            return Err(WorkerError::transcode_failed("no video stream"));
        }
        tokio::fs::write(output, b"jpg").await?;
        Ok(())
    }

    async fn transcode_rendition(
        &self,
        _input: &Path,
        output: &Path,
        profile: &QualityProfile,
        _duration_ms: i64,
        progress: watch::Sender<f64>,
    ) -> WorkerResult<()> {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed.fetch_max(running, Ordering::SeqCst);

        for pct in [25.0, 50.0, 75.0, 100.0] {
            let _ = progress.send(pct);
            tokio::task::yield_now().await;
        }
        if !self.rendition_delay.is_zero() {
            tokio::time::sleep(self.rendition_delay).await;
        }

        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on_label.as_deref() == Some(profile.label.as_str()) {
            return Err(WorkerError::transcode_failed("encoder exited with code 1"));
        }
        tokio::fs::write(output, profile.label.as_bytes()).await?;
        Ok(())
    }
}

#[derive(Default)]
struct FakeUpload {
    fail_on_key_containing: Option<String>,
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectUpload for FakeUpload {
    async fn put(&self, _path: &Path, key: &str) -> WorkerResult<String> {
        if let Some(needle) = &self.fail_on_key_containing {
            if key.contains(needle.as_str()) {
                return Err(WorkerError::upload_failed("connection reset by peer"));
            }
        }
        self.keys.lock().unwrap().push(key.to_string());
        Ok(format!("https://cdn.test/{key}"))
    }
}

#[derive(Default)]
struct RecordingNotify {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingNotify {
    fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notify for RecordingNotify {
    async fn emit(&self, event: &ProgressEvent) -> WorkerResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct InMemoryQueue {
    ready: Mutex<VecDeque<Delivery>>,
    retries: Mutex<Vec<(TranscodeJob, Duration)>>,
    dead: Mutex<Vec<(TranscodeJob, String)>>,
    acks: Mutex<Vec<String>>,
    next_id: AtomicU64,
    backoff: BackoffPolicy,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            retries: Mutex::new(Vec::new()),
            dead: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            backoff: BackoffPolicy::default(),
        }
    }

    fn push(&self, job: TranscodeJob) -> String {
        let message_id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.ready.lock().unwrap().push_back(Delivery {
            message_id: message_id.clone(),
            job,
        });
        message_id
    }

    fn ack_count(&self) -> usize {
        self.acks.lock().unwrap().len()
    }

    fn retries(&self) -> Vec<(TranscodeJob, Duration)> {
        self.retries.lock().unwrap().clone()
    }

    fn dead(&self) -> Vec<(TranscodeJob, String)> {
        self.dead.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscodeQueue for InMemoryQueue {
    async fn enqueue(&self, job: &TranscodeJob) -> WorkerResult<String> {
        Ok(self.push(job.clone()))
    }

    async fn consume(
        &self,
        _consumer_name: &str,
        _block_ms: u64,
        count: usize,
    ) -> WorkerResult<Vec<Delivery>> {
        let mut ready = self.ready.lock().unwrap();
        let take = count.min(ready.len());
        Ok(ready.drain(..take).collect())
    }

    async fn promote_due(&self) -> WorkerResult<usize> {
        Ok(0)
    }

    async fn ack(&self, message_id: &str) -> WorkerResult<()> {
        self.acks.lock().unwrap().push(message_id.to_string());
        Ok(())
    }

    async fn schedule_retry(&self, job: &TranscodeJob, delay: Duration) -> WorkerResult<()> {
        self.retries.lock().unwrap().push((job.clone(), delay));
        Ok(())
    }

    async fn claim_pending(
        &self,
        _consumer_name: &str,
        _min_idle_ms: u64,
        _count: usize,
    ) -> WorkerResult<Vec<Delivery>> {
        Ok(Vec::new())
    }

    async fn dead_letter(
        &self,
        message_id: &str,
        job: &TranscodeJob,
        error: &str,
    ) -> WorkerResult<()> {
        self.dead
            .lock()
            .unwrap()
            .push((job.clone(), error.to_string()));
        self.ack(message_id).await
    }

    fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }
}

// ---------------------------------------------------------------------------
// Harness

struct Harness {
    config: WorkerConfig,
    store: Arc<InMemoryStore>,
    transform: Arc<FakeTransform>,
    upload: Arc<FakeUpload>,
    notify: Arc<RecordingNotify>,
    _output_dir: tempfile::TempDir,
}

impl Harness {
    fn new(transform: FakeTransform, upload: FakeUpload) -> Self {
        let output_dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            output_dir: output_dir.path().to_path_buf(),
            ..WorkerConfig::default()
        };
        Self {
            config,
            store: Arc::new(InMemoryStore::default()),
            transform: Arc::new(transform),
            upload: Arc::new(upload),
            notify: Arc::new(RecordingNotify::default()),
            _output_dir: output_dir,
        }
    }

    fn context(&self) -> PipelineContext {
        PipelineContext {
            config: self.config.clone(),
            store: self.store.clone(),
            transform: self.transform.clone(),
            upload: self.upload.clone(),
            notify: self.notify.clone(),
        }
    }

    fn seed_record(&self) -> VideoRecord {
        let id = VideoId::new();
        let input = self.config.output_dir.join(format!("{}-input.mp4", id.as_str()));
        std::fs::write(&input, b"input").unwrap();
        let record = VideoRecord::new(id, "input.mp4", input, 5);
        self.store.insert(record.clone());
        record
    }

    fn delivery_for(&self, record: &VideoRecord) -> Delivery {
        Delivery {
            message_id: "1-0".to_string(),
            job: TranscodeJob::new(record.id.clone(), 3),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline tests

#[tokio::test]
async fn successful_job_completes_with_uploaded_renditions() {
    let harness = Harness::new(FakeTransform::default(), FakeUpload::default());
    let ctx = harness.context();
    let record = harness.seed_record();

    ctx.process_job(&harness.delivery_for(&record)).await.unwrap();

    let stored = harness.store.get(&record.id).unwrap();
    assert_eq!(stored.status, VideoStatus::Completed);
    assert_eq!(stored.progress, 100.0);
    assert_eq!(stored.renditions.len(), 3);
    for rendition in &stored.renditions {
        let url = rendition.url.as_deref().unwrap();
        assert!(url.starts_with("https://cdn.test/"), "unexpected url {url}");
        assert!(rendition.size > 0);
    }
    assert_eq!(
        stored.renditions.iter().map(|r| r.quality.as_str()).collect::<Vec<_>>(),
        vec!["480p", "720p", "1080p"]
    );
    assert!(stored.thumbnail_url.is_some());
    assert!(stored.error_message.is_none());

    // local artifacts are gone after success
    assert!(!stored.original_file_path.exists());
    for rendition in &stored.renditions {
        assert!(!rendition.path.exists());
    }
}

#[tokio::test]
async fn emitted_progress_is_strictly_increasing() {
    let harness = Harness::new(FakeTransform::default(), FakeUpload::default());
    let ctx = harness.context();
    let record = harness.seed_record();

    ctx.process_job(&harness.delivery_for(&record)).await.unwrap();

    let events = harness.notify.events();
    assert!(events.len() >= 2);
    for pair in events.windows(2) {
        assert!(
            pair[1].progress > pair[0].progress,
            "non-increasing emission: {} then {}",
            pair[0].progress,
            pair[1].progress
        );
    }
    let last = events.last().unwrap();
    assert_eq!(last.progress, 100);
    assert_eq!(last.status, VideoStatus::Completed);
    assert_eq!(events[0].status, VideoStatus::Processing);
}

#[tokio::test]
async fn thumbnail_failure_does_not_fail_the_job() {
    let transform = FakeTransform {
        thumbnail_fails: true,
        ..FakeTransform::default()
    };
    let harness = Harness::new(transform, FakeUpload::default());
    let ctx = harness.context();
    let record = harness.seed_record();

    ctx.process_job(&harness.delivery_for(&record)).await.unwrap();

    let stored = harness.store.get(&record.id).unwrap();
    assert_eq!(stored.status, VideoStatus::Completed);
    assert!(stored.thumbnail_path.is_none());
    assert!(stored.thumbnail_url.is_none());
    assert_eq!(stored.renditions.len(), 3);
    // no thumbnail key was ever uploaded
    let keys = harness.upload.keys.lock().unwrap().clone();
    assert!(keys.iter().all(|k| !k.contains("thumbnail")));
}

#[tokio::test]
async fn rendition_failure_fails_the_job_and_keeps_earlier_renditions() {
    let transform = FakeTransform {
        fail_on_label: Some("720p".to_string()),
        ..FakeTransform::default()
    };
    let harness = Harness::new(transform, FakeUpload::default());
    let ctx = harness.context();
    let record = harness.seed_record();

    let err = ctx
        .process_job(&harness.delivery_for(&record))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("720p"), "error was: {err}");

    let stored = harness.store.get(&record.id).unwrap();
    assert_eq!(stored.status, VideoStatus::Failed);
    assert!(stored.error_message.as_deref().unwrap().contains("720p"));
    // only the rendition that finished before the failure survives
    assert_eq!(stored.renditions.len(), 1);
    assert_eq!(stored.renditions[0].quality, "480p");
    assert!(stored.renditions[0].url.is_none());
    // nothing was uploaded
    assert!(harness.upload.keys.lock().unwrap().is_empty());

    let last = harness.notify.events().pop().unwrap();
    assert_eq!(last.status, VideoStatus::Failed);
}

#[tokio::test]
async fn upload_failure_fails_the_job_with_no_published_urls() {
    let upload = FakeUpload {
        fail_on_key_containing: Some("720p".to_string()),
        ..FakeUpload::default()
    };
    let harness = Harness::new(FakeTransform::default(), upload);
    let ctx = harness.context();
    let record = harness.seed_record();

    let err = ctx
        .process_job(&harness.delivery_for(&record))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::UploadFailed(_)));

    let stored = harness.store.get(&record.id).unwrap();
    assert_eq!(stored.status, VideoStatus::Failed);
    assert_eq!(stored.renditions.len(), 3);
    // a partial upload never publishes URLs
    assert!(stored.renditions.iter().all(|r| r.url.is_none()));
    assert!(stored.thumbnail_url.is_none());
    // local artifacts survive for the retry
    assert!(stored.original_file_path.exists());
}

#[tokio::test]
async fn missing_record_is_a_hard_error() {
    let harness = Harness::new(FakeTransform::default(), FakeUpload::default());
    let ctx = harness.context();

    let delivery = Delivery {
        message_id: "1-0".to_string(),
        job: TranscodeJob::new(VideoId::new(), 3),
    };
    let err = ctx.process_job(&delivery).await.unwrap_err();
    assert!(matches!(err, WorkerError::JobNotFound(_)));
}

#[tokio::test]
async fn redelivery_resets_state_from_a_failed_attempt() {
    let harness = Harness::new(
        FakeTransform {
            fail_on_label: Some("1080p".to_string()),
            ..FakeTransform::default()
        },
        FakeUpload::default(),
    );
    let ctx = harness.context();
    let record = harness.seed_record();

    ctx.process_job(&harness.delivery_for(&record)).await.unwrap_err();
    let failed = harness.store.get(&record.id).unwrap();
    assert_eq!(failed.status, VideoStatus::Failed);

    // second attempt with a healthy transform
    let retry_ctx = PipelineContext {
        transform: Arc::new(FakeTransform::default()),
        ..harness.context()
    };
    retry_ctx
        .process_job(&harness.delivery_for(&record))
        .await
        .unwrap();

    let stored = harness.store.get(&record.id).unwrap();
    assert_eq!(stored.status, VideoStatus::Completed);
    assert!(stored.error_message.is_none());
    assert_eq!(stored.renditions.len(), 3);
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.mp4");
    std::fs::write(&input, b"input").unwrap();
    let work_dir = dir.path().join("work");
    std::fs::create_dir_all(&work_dir).unwrap();
    let out = work_dir.join("480p.mp4");
    std::fs::write(&out, b"480p").unwrap();

    let mut record = VideoRecord::new(VideoId::new(), "input.mp4", &input, 5);
    record
        .renditions
        .push(snode_models::Rendition::new("480p", &out, 4));

    cleanup_local_files(&record, &work_dir).await.unwrap();
    assert!(!input.exists());
    assert!(!work_dir.exists());

    // second pass sees nothing to remove and still succeeds
    cleanup_local_files(&record, &work_dir).await.unwrap();
}

// ---------------------------------------------------------------------------
// Executor tests

fn executor_with(harness: &Harness, queue: Arc<InMemoryQueue>) -> JobExecutor {
    JobExecutor::new(harness.config.clone(), queue, Arc::new(harness.context()))
}

#[tokio::test]
async fn failed_attempt_schedules_backoff_retry_and_acks() {
    let harness = Harness::new(
        FakeTransform {
            fail_on_label: Some("480p".to_string()),
            ..FakeTransform::default()
        },
        FakeUpload::default(),
    );
    let record = harness.seed_record();
    let queue = Arc::new(InMemoryQueue::new());
    let executor = executor_with(&harness, queue.clone());

    executor.execute_delivery(harness.delivery_for(&record)).await;

    let retries = queue.retries();
    assert_eq!(retries.len(), 1);
    let (job, delay) = &retries[0];
    assert_eq!(job.attempt, 2);
    assert_eq!(job.video_id, record.id);
    assert_eq!(*delay, Duration::from_secs(5));
    assert_eq!(queue.ack_count(), 1);
    assert!(queue.dead().is_empty());
}

#[tokio::test]
async fn second_failure_backs_off_longer() {
    let harness = Harness::new(
        FakeTransform {
            fail_on_label: Some("480p".to_string()),
            ..FakeTransform::default()
        },
        FakeUpload::default(),
    );
    let record = harness.seed_record();
    let queue = Arc::new(InMemoryQueue::new());
    let executor = executor_with(&harness, queue.clone());

    let mut delivery = harness.delivery_for(&record);
    delivery.job = delivery.job.next_attempt();
    executor.execute_delivery(delivery).await;

    let retries = queue.retries();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].0.attempt, 3);
    assert_eq!(retries[0].1, Duration::from_secs(10));
}

#[tokio::test]
async fn final_attempt_failure_dead_letters() {
    let harness = Harness::new(
        FakeTransform {
            fail_on_label: Some("480p".to_string()),
            ..FakeTransform::default()
        },
        FakeUpload::default(),
    );
    let record = harness.seed_record();
    let queue = Arc::new(InMemoryQueue::new());
    let executor = executor_with(&harness, queue.clone());

    let mut delivery = harness.delivery_for(&record);
    delivery.job.attempt = 3;
    executor.execute_delivery(delivery).await;

    assert!(queue.retries().is_empty());
    let dead = queue.dead();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0.video_id, record.id);
    assert!(dead[0].1.contains("480p"));
    assert_eq!(queue.ack_count(), 1);

    let stored = harness.store.get(&record.id).unwrap();
    assert_eq!(stored.status, VideoStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn executor_caps_concurrent_pipelines() {
    let transform = FakeTransform {
        rendition_delay: Duration::from_millis(30),
        ..FakeTransform::default()
    };
    let harness = Harness::new(transform, FakeUpload::default());
    let queue = Arc::new(InMemoryQueue::new());

    let job_count = 5;
    for _ in 0..job_count {
        let record = harness.seed_record();
        queue.push(TranscodeJob::new(record.id.clone(), 3));
    }

    let executor = Arc::new(executor_with(&harness, queue.clone()));
    let run = tokio::spawn({
        let executor = executor.clone();
        async move { executor.run().await }
    });

    // wait until every job is settled
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while queue.ack_count() < job_count {
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    executor.shutdown();
    run.await.unwrap().unwrap();

    assert!(harness.transform.max_concurrent() <= 2);
    assert!(queue.dead().is_empty());
    for (_, record) in harness.store.records.lock().unwrap().iter() {
        assert_eq!(record.status, VideoStatus::Completed);
    }
}

#[tokio::test]
async fn record_saves_follow_the_stage_boundaries() {
    let harness = Harness::new(FakeTransform::default(), FakeUpload::default());
    let ctx = harness.context();
    let record = harness.seed_record();

    ctx.process_job(&harness.delivery_for(&record)).await.unwrap();

    let snapshots = harness.store.snapshots.lock().unwrap().clone();
    // first save enters Processing at 0, last completes at 100
    assert_eq!(snapshots.first().unwrap(), &(VideoStatus::Processing, 0.0));
    assert_eq!(snapshots.last().unwrap(), &(VideoStatus::Completed, 100.0));
    // thumbnail and upload boundaries are persisted
    assert!(snapshots.contains(&(VideoStatus::Processing, 10.0)));
    assert!(snapshots.contains(&(VideoStatus::Processing, 90.0)));
}
