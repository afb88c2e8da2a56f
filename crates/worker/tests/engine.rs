//! Integration tests for the job registry and executor.
//!
//! Runs real jobs through a [`LocalArtifactStore`] on a temp directory with
//! a scripted [`Transform`] whose behaviour is keyed off the input name:
//!
//! - `corrupt*` fails to decode
//! - `panic*` panics
//! - `slow*` sleeps past any test timeout
//! - `wait*` blocks until the test releases it
//! - URLs report download progress with transfer stats
//! - anything else succeeds
//!
//! Verifies:
//! - batch outcomes (completed / partial_failure / failed) and per-file results
//! - isolation of panics and timeouts to one SubTask
//! - cancellation between SubTasks
//! - fatal storage failure emits a single error event
//! - late and slow subscribers converge on the terminal event
//! - queued jobs fail on shutdown

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use magetool_core::error::CoreError;
use magetool_core::job::{JobStatus, SubTaskInput, SubTaskStatus};
use magetool_core::types::JobId;
use magetool_events::{ChannelConfig, EventBus, EventKind, ProgressEvent, Stage, TransferStats};
use magetool_pipeline::{
    ImageFormat, Operation, ProgressReporter, Transform, TransformError, TransformInput,
    TransformOutput, TransformProgress,
};
use magetool_store::{ArtifactStore, LocalArtifactStore, NewArtifact, StoreConfig, StoreError};
use magetool_worker::executor::{CANCELLED, NO_STORAGE_MESSAGE, SHUTDOWN_MESSAGE};
use magetool_worker::{ExecutorConfig, JobExecutor, JobRegistry, NewJob, RegistryConfig};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Scripted transform
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedTransform {
    release: Notify,
}

#[async_trait]
impl Transform for ScriptedTransform {
    async fn apply(
        &self,
        op: &Operation,
        input: TransformInput,
        progress: ProgressReporter,
    ) -> Result<TransformOutput, TransformError> {
        match input {
            TransformInput::Url(url) => {
                let total = 1_000_000u64;
                for step in 0..=10u64 {
                    let downloaded = total * step / 10;
                    progress.report(TransformProgress::downloading(
                        (step * 10) as f64,
                        TransferStats {
                            speed_bps: Some(250_000.0),
                            eta_secs: Some((total - downloaded) / 250_000),
                            downloaded_bytes: Some(downloaded),
                            total_bytes: Some(total),
                        },
                    ));
                    tokio::task::yield_now().await;
                }
                progress.report(TransformProgress::processing(100.0));
                Ok(TransformOutput::new(url.into_bytes(), "mp4")
                    .with_title(Some("Sample Clip".to_string()))
                    .with_duration(Some(12.5)))
            }
            TransformInput::Bytes { data, file_name, .. } => {
                progress.report(TransformProgress::processing(0.0));
                if file_name.starts_with("corrupt") {
                    return Err(TransformError::Decode(format!("{file_name} is not an image")));
                }
                if file_name.starts_with("panic") {
                    panic!("transform bug");
                }
                if file_name.starts_with("slow") {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                if file_name.starts_with("wait") {
                    self.release.notified().await;
                }
                let extension = match op {
                    Operation::ImageConvert { format } => format.extension(),
                    _ => "bin",
                };
                progress.report(TransformProgress::processing(100.0));
                Ok(TransformOutput::new(data.into_iter().rev().collect(), extension))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    registry: Arc<JobRegistry>,
    store: Arc<LocalArtifactStore>,
    transform: Arc<ScriptedTransform>,
    cancel: CancellationToken,
    executor: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

struct Options {
    executor: ExecutorConfig,
    registry: RegistryConfig,
    max_store_bytes: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            registry: RegistryConfig {
                max_active_per_client: 0,
                ..RegistryConfig::default()
            },
            max_store_bytes: 64 * 1024 * 1024,
        }
    }
}

async fn harness(options: Options) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut store_config = StoreConfig::new(dir.path().join("artifacts"));
    store_config.max_total_bytes = options.max_store_bytes;
    let store = Arc::new(LocalArtifactStore::open(store_config).await.unwrap());
    let transform = Arc::new(ScriptedTransform::default());
    let bus = Arc::new(EventBus::default());

    let (registry, queue) = JobRegistry::new(options.registry, Arc::clone(&bus));
    let executor = Arc::new(JobExecutor::new(
        options.executor,
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&transform) as Arc<dyn Transform>,
        bus,
    ));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(executor.run(queue, cancel.clone()));

    Harness {
        registry,
        store,
        transform,
        cancel,
        executor: handle,
        _dir: dir,
    }
}

impl Harness {
    async fn upload(&self, name: &str, data: &[u8]) -> SubTaskInput {
        let meta = self
            .store
            .put(data, NewArtifact::new("tester", name, "image/png"))
            .await
            .unwrap();
        SubTaskInput::Artifact {
            artifact_id: meta.id,
            original_name: name.to_string(),
            content_type: "image/png".to_string(),
        }
    }

    async fn submit(&self, operation: Operation, inputs: Vec<SubTaskInput>) -> JobId {
        self.registry
            .create_job(NewJob {
                client_id: "tester".to_string(),
                operation,
                route: "images/convert".to_string(),
                inputs,
            })
            .await
            .unwrap()
    }

    /// Every event from subscription to the terminal one.
    async fn collect(&self, id: JobId) -> Vec<Arc<ProgressEvent>> {
        let mut sub = self.registry.subscribe(id).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), async {
            let mut events = Vec::new();
            while let Some(event) = sub.next().await {
                events.push(event);
            }
            events
        })
        .await
        .expect("job did not finish in time")
    }

    async fn wait_terminal(&self, id: JobId) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if self.registry.get_job(id).await.unwrap().status.is_terminal() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job did not finish in time");
    }
}

fn convert_to_png() -> Operation {
    Operation::ImageConvert {
        format: ImageFormat::Png,
    }
}

// ---------------------------------------------------------------------------
// Test: a batch where every file converts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_of_valid_images_completes_with_one_output_each() {
    let h = harness(Options::default()).await;
    let inputs = vec![
        h.upload("a.jpg", b"aaa").await,
        h.upload("b.jpg", b"bbb").await,
        h.upload("c.webp", b"ccc").await,
    ];

    let id = h.submit(convert_to_png(), inputs).await;
    let events = h.collect(id).await;

    let terminal = events.last().unwrap();
    assert_eq!(terminal.kind, EventKind::Completed);
    let outcome = terminal.outcome.as_ref().unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.files.len(), 3);

    for file in &outcome.files {
        let artifact = file.filename.as_deref().unwrap();
        assert!(artifact.ends_with(".png"), "{artifact}");
        assert!(file.download_name.as_deref().unwrap().ends_with(".png"));
        let (bytes, _) = h
            .store
            .get(&magetool_core::types::ArtifactId::parse(artifact).unwrap())
            .await
            .unwrap();
        assert_eq!(bytes.len(), 3);
    }

    let snapshot = h.registry.get_job(id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.progress, 100.0);
    assert!(snapshot
        .subtasks
        .iter()
        .all(|s| s.status == SubTaskStatus::Succeeded));
}

// ---------------------------------------------------------------------------
// Test: one corrupt file in a batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn corrupt_file_yields_partial_failure_naming_it() {
    let h = harness(Options::default()).await;
    let inputs = vec![
        h.upload("a.png", b"aaa").await,
        h.upload("corrupt.png", b"???").await,
        h.upload("c.png", b"ccc").await,
    ];

    let id = h.submit(convert_to_png(), inputs).await;
    let events = h.collect(id).await;

    let terminal = events.last().unwrap();
    assert_eq!(terminal.kind, EventKind::Completed);
    let outcome = terminal.outcome.as_ref().unwrap();
    assert_eq!(outcome.status, JobStatus::PartialFailure);
    assert_eq!(outcome.succeeded().count(), 2);

    let failed: Vec<_> = outcome.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].index, 1);
    assert_eq!(failed[0].original, "corrupt.png");
    assert!(failed[0].error.as_deref().unwrap().contains("corrupt.png"));
    assert!(failed[0].filename.is_none());
}

#[tokio::test]
async fn all_files_failing_ends_in_error_event() {
    let h = harness(Options::default()).await;
    let inputs = vec![
        h.upload("corrupt-1.png", b"x").await,
        h.upload("corrupt-2.png", b"y").await,
    ];

    let id = h.submit(convert_to_png(), inputs).await;
    let events = h.collect(id).await;

    let terminal = events.last().unwrap();
    assert_eq!(terminal.kind, EventKind::Error);
    assert_eq!(terminal.message, "All 2 file(s) failed");
    assert_eq!(terminal.outcome.as_ref().unwrap().status, JobStatus::Failed);
    assert_eq!(h.registry.get_job(id).await.unwrap().status, JobStatus::Failed);
}

// ---------------------------------------------------------------------------
// Test: URL download progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn url_download_streams_monotonic_progress_then_one_completion() {
    let h = harness(Options::default()).await;
    let id = h
        .submit(
            Operation::MediaDownload { audio_only: false },
            vec![SubTaskInput::Url {
                url: "https://cdn.example.com/clip.mp4".to_string(),
            }],
        )
        .await;

    let events = h.collect(id).await;

    let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal_count, 1);
    let terminal = events.last().unwrap();
    assert_eq!(terminal.kind, EventKind::Completed);

    let percents: Vec<f64> = events.iter().filter_map(|e| e.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");

    let downloading: Vec<_> = events
        .iter()
        .filter(|e| e.stage == Some(Stage::Downloading) && e.transfer.is_some())
        .collect();
    assert!(!downloading.is_empty());
    assert!(downloading
        .iter()
        .all(|e| e.transfer.unwrap().total_bytes == Some(1_000_000)));

    let file = &terminal.outcome.as_ref().unwrap().files[0];
    assert_eq!(file.title.as_deref(), Some("Sample Clip"));
    assert_eq!(file.duration, Some(12.5));
    assert_eq!(file.download_name.as_deref(), Some("Sample Clip.mp4"));
    let artifact = magetool_core::types::ArtifactId::parse(file.filename.as_deref().unwrap()).unwrap();
    assert!(h.store.head(&artifact).await.is_ok());
}

// ---------------------------------------------------------------------------
// Test: oversized batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forty_one_inputs_are_rejected_without_creating_a_job() {
    let h = harness(Options::default()).await;
    let inputs = (0..41)
        .map(|i| SubTaskInput::Url {
            url: format!("https://cdn.example.com/{i}.mp4"),
        })
        .collect();

    let result = h
        .registry
        .create_job(NewJob {
            client_id: "tester".to_string(),
            operation: Operation::MediaDownload { audio_only: false },
            route: "videos/youtube-download".to_string(),
            inputs,
        })
        .await;

    assert_matches!(result, Err(CoreError::Validation(_)));
    assert_eq!(h.registry.len().await, 0);
}

// ---------------------------------------------------------------------------
// Test: failure isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_transform_fails_only_its_subtask() {
    let h = harness(Options::default()).await;
    let inputs = vec![h.upload("panic.png", b"x").await, h.upload("ok.png", b"y").await];

    let id = h.submit(convert_to_png(), inputs).await;
    h.wait_terminal(id).await;

    let snapshot = h.registry.get_job(id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::PartialFailure);
    assert_eq!(snapshot.subtasks[0].status, SubTaskStatus::Failed);
    assert_eq!(snapshot.subtasks[1].status, SubTaskStatus::Succeeded);
}

#[tokio::test]
async fn timeout_fails_only_its_subtask() {
    let h = harness(Options {
        executor: ExecutorConfig {
            subtask_timeout: Duration::from_millis(200),
            ..ExecutorConfig::default()
        },
        ..Options::default()
    })
    .await;
    let inputs = vec![h.upload("slow.png", b"x").await, h.upload("ok.png", b"y").await];

    let id = h.submit(convert_to_png(), inputs).await;
    h.wait_terminal(id).await;

    let snapshot = h.registry.get_job(id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::PartialFailure);
    assert!(snapshot.subtasks[0]
        .error
        .as_deref()
        .unwrap()
        .starts_with("Timed out"));
    assert_eq!(snapshot.subtasks[1].status, SubTaskStatus::Succeeded);
}

#[tokio::test]
async fn inputs_are_removed_after_processing() {
    let h = harness(Options::default()).await;
    let input = h.upload("a.png", b"aaa").await;
    let SubTaskInput::Artifact { artifact_id, .. } = input.clone() else {
        unreachable!()
    };

    let id = h.submit(convert_to_png(), vec![input]).await;
    h.wait_terminal(id).await;

    assert_matches!(h.store.head(&artifact_id).await, Err(StoreError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Test: cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_skips_unstarted_subtasks_and_keeps_finished_ones() {
    let h = harness(Options {
        executor: ExecutorConfig {
            subtask_concurrency: 1,
            ..ExecutorConfig::default()
        },
        ..Options::default()
    })
    .await;
    let inputs = vec![
        h.upload("wait.png", b"x").await,
        h.upload("b.png", b"y").await,
        h.upload("c.png", b"z").await,
    ];

    let id = h.submit(convert_to_png(), inputs).await;
    let mut sub = h.registry.subscribe(id).await.unwrap();
    // Wait until the first SubTask is running.
    while let Some(event) = sub.next().await {
        if event.subtask == Some(0) {
            break;
        }
    }

    h.registry.cancel(id, "tester").await.unwrap();
    h.transform.release.notify_one();
    h.wait_terminal(id).await;

    let snapshot = h.registry.get_job(id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::PartialFailure);
    assert_eq!(snapshot.subtasks[0].status, SubTaskStatus::Succeeded);
    for subtask in &snapshot.subtasks[1..] {
        assert_eq!(subtask.status, SubTaskStatus::Failed);
        assert_eq!(subtask.error.as_deref(), Some(CANCELLED));
    }
}

// ---------------------------------------------------------------------------
// Test: fatal job failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_storage_capacity_fails_job_with_single_error_event() {
    let h = harness(Options {
        max_store_bytes: 0,
        ..Options::default()
    })
    .await;
    let id = h
        .submit(
            Operation::MediaDownload { audio_only: true },
            vec![SubTaskInput::Url {
                url: "https://cdn.example.com/a.mp3".to_string(),
            }],
        )
        .await;

    let events = h.collect(id).await;

    let errors: Vec<_> = events.iter().filter(|e| e.kind == EventKind::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, NO_STORAGE_MESSAGE);
    assert!(events.last().unwrap().is_terminal());

    let snapshot = h.registry.get_job(id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some(NO_STORAGE_MESSAGE));
}

// ---------------------------------------------------------------------------
// Test: subscribers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_subscriber_gets_terminal_event_immediately() {
    let h = harness(Options::default()).await;
    let id = h.submit(convert_to_png(), vec![h.upload("a.png", b"a").await]).await;
    h.wait_terminal(id).await;

    let mut sub = h.registry.subscribe(id).await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(1), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.kind, EventKind::Completed);
    assert!(sub.next().await.is_none());
}

#[tokio::test]
async fn slow_subscriber_misses_progress_but_gets_terminal_once() {
    let h = harness(Options {
        registry: RegistryConfig {
            max_active_per_client: 0,
            channel: ChannelConfig {
                log_capacity: 256,
                subscriber_buffer: 2,
            },
            ..RegistryConfig::default()
        },
        ..Options::default()
    })
    .await;
    let id = h
        .submit(
            Operation::MediaDownload { audio_only: false },
            vec![SubTaskInput::Url {
                url: "https://cdn.example.com/clip.mp4".to_string(),
            }],
        )
        .await;
    let mut sub = h.registry.subscribe(id).await.unwrap();

    // Do not read until the job is done.
    h.wait_terminal(id).await;

    let mut events = Vec::new();
    while let Some(event) = sub.next().await {
        events.push(event);
    }

    assert!(sub.missed() > 0);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().unwrap().is_terminal());
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[tokio::test]
async fn poll_view_matches_stream_view() {
    let h = harness(Options::default()).await;
    let id = h.submit(convert_to_png(), vec![h.upload("a.png", b"a").await]).await;
    let streamed = h.collect(id).await;

    let entry = h.registry.get_entry(id).await.unwrap();
    let logged = entry.channel().events_since(None);
    assert_eq!(logged.last().unwrap().seq, streamed.last().unwrap().seq);
    assert_eq!(entry.outcome().unwrap().status, JobStatus::Completed);
}

// ---------------------------------------------------------------------------
// Test: shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queued_jobs_fail_when_executor_stops() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        LocalArtifactStore::open(StoreConfig::new(dir.path()))
            .await
            .unwrap(),
    );
    let bus = Arc::new(EventBus::default());
    let (registry, queue) = JobRegistry::new(RegistryConfig::default(), Arc::clone(&bus));
    let executor = Arc::new(JobExecutor::new(
        ExecutorConfig::default(),
        store,
        Arc::new(ScriptedTransform::default()),
        bus,
    ));

    let id = registry
        .create_job(NewJob {
            client_id: "tester".to_string(),
            operation: Operation::MediaDownload { audio_only: false },
            route: "videos/youtube-download".to_string(),
            inputs: vec![SubTaskInput::Url {
                url: "https://cdn.example.com/a.mp4".to_string(),
            }],
        })
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    executor.run(queue, cancel).await;

    let snapshot = registry.get_job(id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some(SHUTDOWN_MESSAGE));

    let mut sub = registry.subscribe(id).await.unwrap();
    let terminal = sub.next().await.unwrap();
    assert_eq!(terminal.kind, EventKind::Error);
    assert_eq!(terminal.message, SHUTDOWN_MESSAGE);

    // The queue is closed; new work is refused.
    assert_matches!(
        registry
            .create_job(NewJob {
                client_id: "other".to_string(),
                operation: Operation::MediaDownload { audio_only: false },
                route: "videos/youtube-download".to_string(),
                inputs: vec![SubTaskInput::Url {
                    url: "https://cdn.example.com/b.mp4".to_string(),
                }],
            })
            .await,
        Err(CoreError::Internal(_))
    );
}

#[tokio::test]
async fn executor_stops_on_cancel() {
    let h = harness(Options::default()).await;
    h.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), h.executor)
        .await
        .unwrap()
        .unwrap();
}
