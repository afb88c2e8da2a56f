//! Job and SubTask model.
//!
//! A [`JobState`] holds the mutable part of one processing request: its
//! overall status and a fixed list of [`SubTask`]s (one per input). All
//! status changes go through the methods here so the monotonic transition
//! rules hold regardless of which component drives them.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{ArtifactId, ClientId, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Overall job status.
///
/// Transitions are forward-only:
/// `pending -> running -> {completed | partial_failure | failed}`.
/// A pending job may also fail directly (e.g. dropped during shutdown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    PartialFailure,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::PartialFailure | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Running, Completed | PartialFailure | Failed)
        )
    }
}

/// Status of a single SubTask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl SubTaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// SubTask
// ---------------------------------------------------------------------------

/// What a SubTask processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubTaskInput {
    /// An uploaded file held in the artifact store.
    Artifact {
        artifact_id: ArtifactId,
        original_name: String,
        content_type: String,
    },
    /// A remote source fetched by the transform itself.
    Url { url: String },
}

impl SubTaskInput {
    /// Name shown to the user for this input.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Artifact { original_name, .. } => original_name,
            Self::Url { url } => url,
        }
    }
}

/// Reference to a SubTask's stored output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRef {
    pub artifact_id: ArtifactId,
    /// Suggested download name (original stem + output extension).
    pub file_name: String,
    pub size_bytes: u64,
    /// Media title, for download-style operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Media duration in seconds, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

/// The unit of work for one input within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub index: usize,
    pub input: SubTaskInput,
    pub status: SubTaskStatus,
    /// Completion percentage, `0.0..=100.0`, never decreasing.
    pub progress: f64,
    pub output: Option<OutputRef>,
    pub error: Option<String>,
}

impl SubTask {
    pub fn new(index: usize, input: SubTaskInput) -> Self {
        Self {
            index,
            input,
            status: SubTaskStatus::Pending,
            progress: 0.0,
            output: None,
            error: None,
        }
    }

    /// Move a pending SubTask to running. Returns `false` otherwise.
    pub fn start(&mut self) -> bool {
        if self.status != SubTaskStatus::Pending {
            return false;
        }
        self.status = SubTaskStatus::Running;
        true
    }

    /// Raise progress to `percent` (clamped to 100).
    ///
    /// Lower values and updates to non-running SubTasks are ignored.
    /// Returns `true` when the stored value changed.
    pub fn advance(&mut self, percent: f64) -> bool {
        if self.status != SubTaskStatus::Running || !percent.is_finite() {
            return false;
        }
        let clamped = percent.clamp(0.0, 100.0);
        if clamped <= self.progress {
            return false;
        }
        self.progress = clamped;
        true
    }

    pub fn succeed(&mut self, output: OutputRef) {
        if self.status.is_terminal() {
            return;
        }
        self.status = SubTaskStatus::Succeeded;
        self.progress = 100.0;
        self.output = Some(output);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = SubTaskStatus::Failed;
        self.error = Some(error.into());
    }
}

/// Terminal job status implied by a set of SubTasks.
///
/// Returns `None` while any SubTask is unresolved. Otherwise: all succeeded
/// -> `completed`, all failed -> `failed`, mixed -> `partial_failure`.
pub fn terminal_status(subtasks: &[SubTask]) -> Option<JobStatus> {
    if subtasks.iter().any(|s| !s.status.is_terminal()) {
        return None;
    }
    let succeeded = subtasks
        .iter()
        .filter(|s| s.status == SubTaskStatus::Succeeded)
        .count();
    Some(match succeeded {
        0 => JobStatus::Failed,
        n if n == subtasks.len() => JobStatus::Completed,
        _ => JobStatus::PartialFailure,
    })
}

/// Mean progress across SubTasks; resolved SubTasks count as 100.
pub fn aggregate_progress(subtasks: &[SubTask]) -> f64 {
    if subtasks.is_empty() {
        return 0.0;
    }
    let total: f64 = subtasks
        .iter()
        .map(|s| {
            if s.status.is_terminal() {
                100.0
            } else {
                s.progress
            }
        })
        .sum();
    total / subtasks.len() as f64
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Mutable state of one job.
#[derive(Debug, Clone)]
pub struct JobState {
    status: JobStatus,
    subtasks: Vec<SubTask>,
    started_at: Option<Timestamp>,
    ended_at: Option<Timestamp>,
    error: Option<String>,
}

impl JobState {
    /// One pending SubTask per input, in order. The count is fixed from here on.
    pub fn new(inputs: Vec<SubTaskInput>) -> Self {
        Self {
            status: JobStatus::Pending,
            subtasks: inputs
                .into_iter()
                .enumerate()
                .map(|(i, input)| SubTask::new(i, input))
                .collect(),
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn subtasks(&self) -> &[SubTask] {
        &self.subtasks
    }

    pub fn subtask_mut(&mut self, index: usize) -> Option<&mut SubTask> {
        self.subtasks.get_mut(index)
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<Timestamp> {
        self.ended_at
    }

    /// Job-level error message, set only by a fatal failure.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn progress(&self) -> f64 {
        if self.status.is_terminal() {
            return 100.0;
        }
        aggregate_progress(&self.subtasks)
    }

    fn transition(&mut self, next: JobStatus, now: Timestamp) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "Illegal job transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    /// `pending -> running`.
    pub fn mark_running(&mut self, now: Timestamp) -> Result<(), CoreError> {
        self.transition(JobStatus::Running, now)
    }

    /// Resolve the job from its SubTasks.
    ///
    /// Fails if any SubTask is still unresolved or the job is not running.
    pub fn finish(&mut self, now: Timestamp) -> Result<JobStatus, CoreError> {
        let status = terminal_status(&self.subtasks).ok_or_else(|| {
            CoreError::Conflict("Cannot finish a job with unresolved subtasks".to_string())
        })?;
        self.transition(status, now)?;
        Ok(status)
    }

    /// Whole-job failure: unresolved SubTasks are failed with `message` too.
    pub fn fail_fatal(&mut self, message: &str, now: Timestamp) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed, now)?;
        for subtask in &mut self.subtasks {
            subtask.fail(message);
        }
        self.error = Some(message.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// Per-input line of a finished job's result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pub index: usize,
    /// The input's original file name (or source URL).
    pub original: String,
    /// Artifact id of the output, usable with the download endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Suggested download name for the output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal summary carried by a job's final progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub files: Vec<FileResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn from_state(state: &JobState) -> Self {
        let files = state
            .subtasks()
            .iter()
            .map(|s| FileResult {
                index: s.index,
                original: s.input.display_name().to_string(),
                filename: s.output.as_ref().map(|o| o.artifact_id.to_string()),
                download_name: s.output.as_ref().map(|o| o.file_name.clone()),
                size: s.output.as_ref().map(|o| o.size_bytes),
                title: s.output.as_ref().and_then(|o| o.title.clone()),
                duration: s.output.as_ref().and_then(|o| o.duration_secs),
                error: s.error.clone(),
            })
            .collect();
        Self {
            status: state.status(),
            files,
            error: state.error().map(str::to_string),
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &FileResult> {
        self.files.iter().filter(|f| f.error.is_none())
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileResult> {
        self.files.iter().filter(|f| f.error.is_some())
    }
}

/// Point-in-time copy of a job, safe to hand to HTTP handlers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub client_id: ClientId,
    pub operation: String,
    pub status: JobStatus,
    pub progress: f64,
    pub subtasks: Vec<SubTask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
