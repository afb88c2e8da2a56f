//! Job executor.
//!
//! A single long-lived task pulls jobs off the [`JobQueue`] and runs each
//! one on its own Tokio task, bounded by `max_concurrent_jobs`. Inside a
//! job, SubTasks run through a `buffer_unordered` pool of
//! `subtask_concurrency`. Every transform call is spawned separately and
//! raced against `subtask_timeout`, so a panic or a hang only fails that
//! SubTask.
//!
//! Progress is published through the job's [`ProgressChannel`](magetool_events::ProgressChannel).
//! Raw transform updates are thinned out: an event goes out when the job
//! percentage moves by at least `progress_step`, when the stage changes,
//! or (for transfers) once per `progress_tick`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use magetool_core::job::{JobOutcome, JobStatus, OutputRef, SubTaskInput};
use magetool_core::job_events::{EVENT_JOB_FINISHED, EVENT_JOB_STARTED};
use magetool_core::naming;
use magetool_core::progress::crosses_step;
use magetool_events::{EventBus, LifecycleEvent, ProgressEvent, Stage};
use magetool_pipeline::download::file_name_from_url;
use magetool_pipeline::{ProgressReporter, Transform, TransformInput, TransformOutput, TransformProgress};
use magetool_store::{ArtifactStore, NewArtifact, StoreError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::registry::{JobEntry, JobQueue};

/// Failure recorded on SubTasks skipped after a cancellation request.
pub const CANCELLED: &str = "cancelled";

/// Failure recorded on jobs still queued when the executor stops.
pub const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// Fatal failure when the store cannot take any output at all.
pub const NO_STORAGE_MESSAGE: &str = "No storage capacity available";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// SubTasks of one job processed at the same time.
    pub subtask_concurrency: usize,
    /// Jobs running at the same time, process-wide.
    pub max_concurrent_jobs: usize,
    /// Upper bound on one transform call.
    pub subtask_timeout: Duration,
    /// Smallest change in job percentage worth an event.
    pub progress_step: f64,
    /// Longest gap between events while a transfer keeps reporting.
    pub progress_tick: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            subtask_concurrency: 4,
            max_concurrent_jobs: 8,
            subtask_timeout: Duration::from_secs(600),
            progress_step: 1.0,
            progress_tick: Duration::from_secs(1),
        }
    }
}

/// Drives queued jobs to a terminal status.
pub struct JobExecutor {
    config: ExecutorConfig,
    store: Arc<dyn ArtifactStore>,
    transform: Arc<dyn Transform>,
    event_bus: Arc<EventBus>,
}

impl JobExecutor {
    pub fn new(
        config: ExecutorConfig,
        store: Arc<dyn ArtifactStore>,
        transform: Arc<dyn Transform>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            store,
            transform,
            event_bus,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run the dispatch loop until the queue closes or `cancel` fires.
    ///
    /// On shutdown, jobs still queued are failed and jobs already running
    /// are awaited; callers bound the drain with their own timeout.
    pub async fn run(self: Arc<Self>, mut queue: JobQueue, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let tracker = TaskTracker::new();
        tracing::info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            subtask_concurrency = self.config.subtask_concurrency,
            subtask_timeout_secs = self.config.subtask_timeout.as_secs(),
            "Job executor started",
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Job executor shutting down");
                    break;
                }
                next = queue.recv() => {
                    let Some(entry) = next else {
                        tracing::info!("Job queue closed");
                        break;
                    };
                    let permit = tokio::select! {
                        _ = cancel.cancelled() => {
                            self.fail_job(&entry, SHUTDOWN_MESSAGE);
                            break;
                        }
                        permit = Arc::clone(&permits).acquire_owned() => permit,
                    };
                    let Ok(permit) = permit else {
                        self.fail_job(&entry, SHUTDOWN_MESSAGE);
                        break;
                    };
                    let executor = Arc::clone(&self);
                    tracker.spawn(async move {
                        let _permit = permit;
                        executor.execute(entry).await;
                    });
                }
            }
        }

        for entry in queue.close_and_drain() {
            self.fail_job(&entry, SHUTDOWN_MESSAGE);
        }

        tracker.close();
        if !tracker.is_empty() {
            tracing::info!(in_flight = tracker.len(), "Waiting for in-flight jobs");
        }
        tracker.wait().await;
        tracing::info!("Job executor stopped");
    }

    /// Run one job to its terminal status.
    pub async fn execute(&self, entry: Arc<JobEntry>) {
        let job_id = entry.id;
        let count = {
            let mut state = entry.state();
            if let Err(e) = state.mark_running(Utc::now()) {
                tracing::warn!(job_id = %job_id, error = %e, "Job is not runnable, skipping");
                return;
            }
            state.subtasks().len()
        };

        tracing::info!(
            job_id = %job_id,
            client_id = %entry.client_id,
            operation = %entry.operation,
            subtasks = count,
            "Job started",
        );
        self.publish(&entry, ProgressEvent::starting(job_id, format!("Processing {count} file(s)")));
        self.event_bus
            .publish(LifecycleEvent::new(EVENT_JOB_STARTED, job_id, entry.client_id.clone()));

        if self.store.available_bytes() == 0 {
            self.fail_job(&entry, NO_STORAGE_MESSAGE);
            return;
        }

        let gate = ProgressGate::new(self.config.progress_step, self.config.progress_tick);
        // Futures are lazy: each checks for cancellation only when the
        // pool gets round to it.
        let subtasks: Vec<_> = (0..count)
            .map(|index| self.run_subtask(&entry, index, &gate))
            .collect();
        futures::stream::iter(subtasks)
            .buffer_unordered(self.config.subtask_concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        self.finish(&entry);
    }

    // -----------------------------------------------------------------------
    // SubTasks
    // -----------------------------------------------------------------------

    async fn run_subtask(&self, entry: &Arc<JobEntry>, index: usize, gate: &Arc<ProgressGate>) {
        if entry.is_cancelled() {
            let name = {
                let mut state = entry.state();
                let Some(subtask) = state.subtask_mut(index) else {
                    return;
                };
                subtask.fail(CANCELLED);
                subtask.input.display_name().to_string()
            };
            gate.force(entry, |percent| {
                ProgressEvent::progress(entry.id, percent, format!("Skipped {name}: {CANCELLED}"))
                    .with_subtask(index)
            });
            return;
        }

        let input = {
            let mut state = entry.state();
            let Some(subtask) = state.subtask_mut(index) else {
                return;
            };
            subtask.start();
            subtask.input.clone()
        };
        let name = input.display_name().to_string();
        let stage = match input {
            SubTaskInput::Url { .. } => Stage::Downloading,
            SubTaskInput::Artifact { .. } => Stage::Processing,
        };
        gate.force(entry, |percent| {
            ProgressEvent::progress(entry.id, percent, stage_message(stage, &name))
                .with_subtask(index)
                .with_stage(stage)
        });

        let result = self.process(entry, index, &input, gate).await;

        let message = {
            let mut state = entry.state();
            let Some(subtask) = state.subtask_mut(index) else {
                return;
            };
            match result {
                Ok(output) => {
                    subtask.succeed(output);
                    format!("Finished {name}")
                }
                Err(error) => {
                    tracing::warn!(
                        job_id = %entry.id,
                        subtask = index,
                        input = %name,
                        error = %error,
                        "SubTask failed",
                    );
                    let message = format!("Failed {name}: {error}");
                    subtask.fail(error);
                    message
                }
            }
        };
        gate.force(entry, |percent| {
            ProgressEvent::progress(entry.id, percent, message).with_subtask(index)
        });

        if let SubTaskInput::Artifact { artifact_id, .. } = &input {
            if let Err(e) = self.store.delete(artifact_id).await {
                tracing::warn!(artifact_id = %artifact_id, error = %e, "Failed to delete input artifact");
            }
        }
    }

    /// Load the input, run the transform, store the output.
    ///
    /// Every failure comes back as the message recorded on the SubTask.
    async fn process(
        &self,
        entry: &Arc<JobEntry>,
        index: usize,
        input: &SubTaskInput,
        gate: &Arc<ProgressGate>,
    ) -> Result<OutputRef, String> {
        let transform_input = match input {
            SubTaskInput::Artifact {
                artifact_id,
                original_name,
                content_type,
            } => {
                let (data, _) = self.store.get(artifact_id).await.map_err(|e| match e {
                    StoreError::NotFound(_) => "Input file is no longer available".to_string(),
                    other => format!("Could not read input: {other}"),
                })?;
                TransformInput::Bytes {
                    data,
                    file_name: original_name.clone(),
                    content_type: content_type.clone(),
                }
            }
            SubTaskInput::Url { url } => TransformInput::Url(url.clone()),
        };

        let reporter = progress_reporter(entry, index, gate, input.display_name().to_string());
        let transform = Arc::clone(&self.transform);
        let operation = entry.operation.clone();
        let mut handle = tokio::spawn(async move {
            transform.apply(&operation, transform_input, reporter).await
        });

        let output = match tokio::time::timeout(self.config.subtask_timeout, &mut handle).await {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(e))) => return Err(e.to_string()),
            Ok(Err(e)) if e.is_panic() => {
                tracing::error!(job_id = %entry.id, subtask = index, "Transform panicked");
                return Err("Processing failed unexpectedly".to_string());
            }
            Ok(Err(_)) => return Err("Processing was aborted".to_string()),
            Err(_) => {
                handle.abort();
                return Err(format!("Timed out after {:?}", self.config.subtask_timeout));
            }
        };

        self.store_output(entry, input, output).await
    }

    async fn store_output(
        &self,
        entry: &JobEntry,
        input: &SubTaskInput,
        output: TransformOutput,
    ) -> Result<OutputRef, String> {
        let file_name = download_name(input, &output);
        let meta = self
            .store
            .put(
                &output.data,
                NewArtifact::new(entry.client_id.clone(), file_name.clone(), output.content_type)
                    .with_extension(output.extension),
            )
            .await
            .map_err(|e| format!("Could not store output: {e}"))?;

        Ok(OutputRef {
            artifact_id: meta.id,
            file_name,
            size_bytes: meta.size_bytes,
            title: output.title,
            duration_secs: output.duration_secs,
        })
    }

    // -----------------------------------------------------------------------
    // Terminal transitions
    // -----------------------------------------------------------------------

    fn finish(&self, entry: &JobEntry) {
        let resolved = {
            let mut state = entry.state();
            state
                .finish(Utc::now())
                .map(|_| JobOutcome::from_state(&state))
        };
        match resolved {
            Ok(outcome) => self.publish_terminal(entry, outcome),
            Err(e) => {
                tracing::error!(job_id = %entry.id, error = %e, "Job could not be resolved");
                self.fail_job(entry, "Internal error while finishing the job");
            }
        }
    }

    /// Fail the whole job with a single `error` event.
    fn fail_job(&self, entry: &JobEntry, message: &str) {
        let outcome = {
            let mut state = entry.state();
            if let Err(e) = state.fail_fatal(message, Utc::now()) {
                tracing::warn!(job_id = %entry.id, error = %e, "Job already resolved");
                return;
            }
            JobOutcome::from_state(&state)
        };
        tracing::error!(job_id = %entry.id, error = message, "Job failed");
        self.publish_terminal(entry, outcome);
    }

    fn publish_terminal(&self, entry: &JobEntry, outcome: JobOutcome) {
        let status = outcome.status;
        let succeeded = outcome.succeeded().count();
        let failed = outcome.failed().count();

        let event = match status {
            JobStatus::Failed => {
                ProgressEvent::error(entry.id, failure_message(&outcome), Some(outcome))
            }
            _ => ProgressEvent::completed(entry.id, outcome),
        };
        self.publish(entry, event);

        tracing::info!(
            job_id = %entry.id,
            client_id = %entry.client_id,
            status = status.as_str(),
            succeeded,
            failed,
            "Job finished",
        );
        self.event_bus.publish(
            LifecycleEvent::new(EVENT_JOB_FINISHED, entry.id, entry.client_id.clone()).with_payload(
                serde_json::json!({
                    "status": status.as_str(),
                    "succeeded": succeeded,
                    "failed": failed,
                }),
            ),
        );
    }

    fn publish(&self, entry: &JobEntry, event: ProgressEvent) {
        publish_event(entry, event);
    }
}

/// Publish on the job's channel, logging an event the channel refused.
/// Returns whether the event was accepted.
fn publish_event(entry: &JobEntry, event: ProgressEvent) -> bool {
    match entry.channel().publish(event) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(job_id = %entry.id, error = %e, "Dropped progress event");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Progress thinning
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct GateState {
    percent: Option<f64>,
    stage: Option<Stage>,
    at: Option<Instant>,
}

/// Serialises progress publication for one job.
///
/// The job percentage is read and published under one lock, so concurrent
/// SubTasks can never emit percentages out of order.
#[derive(Debug)]
struct ProgressGate {
    step: f64,
    tick: Duration,
    last: Mutex<GateState>,
}

impl ProgressGate {
    fn new(step: f64, tick: Duration) -> Arc<Self> {
        Arc::new(Self {
            step,
            tick,
            // The `starting` event already reported 0%.
            last: Mutex::new(GateState {
                percent: Some(0.0),
                stage: None,
                at: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish unconditionally.
    fn force(&self, entry: &JobEntry, build: impl FnOnce(f64) -> ProgressEvent) {
        let mut last = self.lock();
        let percent = entry.state().progress();
        let event = build(percent);
        Self::record(&mut last, percent, event.stage);
        publish_event(entry, event);
    }

    /// Publish if the update is worth an event.
    fn offer(&self, entry: &JobEntry, update: &TransformProgress, build: impl FnOnce(f64) -> ProgressEvent) {
        let mut last = self.lock();
        let percent = entry.state().progress();
        let tick_due = !update.transfer.is_empty()
            && last.at.is_none_or(|at| at.elapsed() >= self.tick);
        let due = crosses_step(last.percent, percent, self.step)
            || last.stage != Some(update.stage)
            || tick_due;
        if !due {
            return;
        }
        let event = build(percent);
        Self::record(&mut last, percent, event.stage);
        publish_event(entry, event);
    }

    fn record(last: &mut GateState, percent: f64, stage: Option<Stage>) {
        last.percent = Some(percent);
        if stage.is_some() {
            last.stage = stage;
        }
        last.at = Some(Instant::now());
    }
}

fn progress_reporter(
    entry: &Arc<JobEntry>,
    index: usize,
    gate: &Arc<ProgressGate>,
    name: String,
) -> ProgressReporter {
    let entry = Arc::clone(entry);
    let gate = Arc::clone(gate);
    ProgressReporter::new(move |update: TransformProgress| {
        if let Some(subtask) = entry.state().subtask_mut(index) {
            subtask.advance(update.percent);
        }
        gate.offer(&entry, &update, |percent| {
            ProgressEvent::progress(entry.id, percent, stage_message(update.stage, &name))
                .with_subtask(index)
                .with_stage(update.stage)
                .with_transfer(update.transfer)
        });
    })
}

fn stage_message(stage: Stage, name: &str) -> String {
    match stage {
        Stage::Downloading => format!("Downloading {name}"),
        Stage::Processing => format!("Processing {name}"),
    }
}

/// Suggested download name for a SubTask's output.
fn download_name(input: &SubTaskInput, output: &TransformOutput) -> String {
    let base = match input {
        SubTaskInput::Artifact { original_name, .. } => original_name.clone(),
        SubTaskInput::Url { url } => output
            .title
            .clone()
            .or_else(|| file_name_from_url(url))
            .unwrap_or_else(|| "download".to_string()),
    };
    naming::output_file_name(&base, &output.extension)
}

/// Message for a terminal `error` event.
fn failure_message(outcome: &JobOutcome) -> String {
    if let Some(error) = &outcome.error {
        return error.clone();
    }
    match outcome.files.as_slice() {
        [single] => single
            .error
            .clone()
            .unwrap_or_else(|| "Processing failed".to_string()),
        files => format!("All {} file(s) failed", files.len()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use magetool_core::job::FileResult;
    use magetool_core::types::ArtifactId;
    use magetool_events::ChannelConfig;
    use magetool_pipeline::Operation;

    use super::*;
    use crate::registry::NewJob;

    fn url_entry() -> JobEntry {
        JobEntry::new(
            NewJob {
                client_id: "c1".to_string(),
                operation: Operation::MediaDownload { audio_only: false },
                route: "videos/youtube-download".to_string(),
                inputs: vec![SubTaskInput::Url {
                    url: "https://cdn.example.com/clip.mp4".to_string(),
                }],
            },
            ChannelConfig::default(),
        )
    }

    fn file(index: usize, error: Option<&str>) -> FileResult {
        FileResult {
            index,
            original: format!("f{index}.png"),
            filename: None,
            download_name: None,
            size: None,
            title: None,
            duration: None,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn failure_message_prefers_job_error() {
        let outcome = JobOutcome {
            status: JobStatus::Failed,
            files: vec![file(0, Some("x"))],
            error: Some(NO_STORAGE_MESSAGE.to_string()),
        };
        assert_eq!(failure_message(&outcome), NO_STORAGE_MESSAGE);
    }

    #[test]
    fn failure_message_for_single_file_is_its_error() {
        let outcome = JobOutcome {
            status: JobStatus::Failed,
            files: vec![file(0, Some("Unsupported URL"))],
            error: None,
        };
        assert_eq!(failure_message(&outcome), "Unsupported URL");
    }

    #[test]
    fn failure_message_for_batch_counts_files() {
        let outcome = JobOutcome {
            status: JobStatus::Failed,
            files: vec![file(0, Some("a")), file(1, Some("b"))],
            error: None,
        };
        assert_eq!(failure_message(&outcome), "All 2 file(s) failed");
    }

    #[test]
    fn download_name_uses_original_stem() {
        let input = SubTaskInput::Artifact {
            artifact_id: ArtifactId::generate(Some("jpg")),
            original_name: "holiday.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
        };
        let output = TransformOutput::new(vec![1], "png");
        assert_eq!(download_name(&input, &output), "holiday.png");
    }

    #[test]
    fn download_name_for_urls_prefers_title() {
        let input = SubTaskInput::Url {
            url: "https://cdn.example.com/media/clip.webm".to_string(),
        };
        let titled = TransformOutput::new(vec![1], "mp4").with_title(Some("My Video".to_string()));
        assert_eq!(download_name(&input, &titled), "My Video.mp4");

        let untitled = TransformOutput::new(vec![1], "mp4");
        assert_eq!(download_name(&input, &untitled), "clip.mp4");
    }

    #[test]
    fn events_after_the_terminal_one_are_refused() {
        let entry = url_entry();
        assert!(publish_event(&entry, ProgressEvent::starting(entry.id, "Starting")));
        assert!(publish_event(&entry, ProgressEvent::error(entry.id, "boom", None)));

        assert!(!publish_event(&entry, ProgressEvent::progress(entry.id, 50.0, "late")));

        let gate = ProgressGate::new(10.0, Duration::from_millis(250));
        gate.force(&entry, |percent| ProgressEvent::progress(entry.id, percent, "late"));
        assert!(entry.channel().latest().is_some_and(|e| e.is_terminal()));
    }
}
