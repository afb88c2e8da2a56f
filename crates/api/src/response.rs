//! Response payloads shared by handlers.
//!
//! The job resource endpoints use a `{ "data": ... }` envelope
//! ([`DataResponse`]). Submission results, the URL stream, and the legacy
//! task views keep the flat shapes browser clients already parse.

use magetool_core::job::{FileResult, JobOutcome, JobSnapshot, JobStatus};
use magetool_core::job_events::{
    STREAM_STATUS_COMPLETE, STREAM_STATUS_DOWNLOADING, STREAM_STATUS_ERROR,
    STREAM_STATUS_PROCESSING, STREAM_STATUS_STARTING,
};
use magetool_core::naming;
use magetool_core::progress::{format_bytes, format_eta, format_percent, format_speed};
use magetool_core::types::JobId;
use magetool_events::{EventKind, ProgressEvent, Stage};
use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

// ---------------------------------------------------------------------------
// Submission results
// ---------------------------------------------------------------------------

/// One produced file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    /// Artifact id; also the path segment for `/api/download/{filename}`.
    pub filename: String,
    pub original: String,
    pub download_name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl FileEntry {
    /// `None` for inputs that failed.
    pub fn from_result(result: &FileResult) -> Option<Self> {
        if result.error.is_some() {
            return None;
        }
        let filename = result.filename.clone()?;
        Some(Self {
            download_name: result
                .download_name
                .clone()
                .unwrap_or_else(|| filename.clone()),
            filename,
            original: result.original.clone(),
            size: result.size.unwrap_or(0),
            title: result.title.clone(),
            duration: result.duration,
        })
    }
}

/// One input that failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileError {
    pub original: String,
    pub error: String,
}

/// Body of a synchronous submission.
///
/// Batch submissions carry `files`; a single `file` upload or a URL
/// operation carries `file`. Partial failures list the failed inputs in
/// `errors`.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FileError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitResponse {
    pub fn from_outcome(job_id: JobId, outcome: &JobOutcome, single: bool) -> Self {
        let produced: Vec<FileEntry> = outcome.files.iter().filter_map(FileEntry::from_result).collect();
        let errors: Vec<FileError> = outcome
            .failed()
            .map(|f| FileError {
                original: f.original.clone(),
                error: f.error.clone().unwrap_or_default(),
            })
            .collect();
        let success = outcome.status != JobStatus::Failed;

        let error = (!success).then(|| {
            outcome
                .error
                .clone()
                .or_else(|| match errors.as_slice() {
                    [only] => Some(only.error.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| format!("All {} file(s) failed", outcome.files.len()))
        });

        let (files, file) = if single {
            (None, produced.into_iter().next())
        } else {
            (success.then_some(produced), None)
        };

        Self {
            success,
            job_id,
            status: outcome.status,
            files,
            file,
            errors,
            error,
        }
    }
}

/// Body of an asynchronous submission (`?mode=async`).
///
/// `task_id` repeats `job_id` for clients polling the legacy task views.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub success: bool,
    pub job_id: JobId,
    pub task_id: JobId,
}

impl AcceptedResponse {
    pub fn new(job_id: JobId) -> Self {
        Self {
            success: true,
            job_id,
            task_id: job_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress views
// ---------------------------------------------------------------------------

/// Status word used by the URL stream and the task WebSocket.
pub fn stream_status(event: &ProgressEvent) -> &'static str {
    match event.kind {
        EventKind::Starting => STREAM_STATUS_STARTING,
        EventKind::Progress => match event.stage {
            Some(Stage::Downloading) => STREAM_STATUS_DOWNLOADING,
            _ => STREAM_STATUS_PROCESSING,
        },
        EventKind::Completed => STREAM_STATUS_COMPLETE,
        EventKind::Error => STREAM_STATUS_ERROR,
    }
}

fn round_percent(percent: f64) -> f64 {
    (percent.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

/// One message of the `{operation}-stream` endpoint.
#[derive(Debug, Default, Serialize)]
pub struct StreamMessage {
    pub status: &'static str,
    /// Job being streamed; absent only when no job was created. Lets a
    /// client whose stream dropped poll `/api/jobs/{id}` instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_num: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamMessage {
    /// Error message for a request rejected before a job existed.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            status: STREAM_STATUS_ERROR,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn from_event(event: &ProgressEvent) -> Self {
        Self {
            job_id: Some(event.job_id),
            ..Self::render(event)
        }
    }

    fn render(event: &ProgressEvent) -> Self {
        let status = stream_status(event);
        match event.kind {
            EventKind::Completed => {
                let produced = event
                    .outcome
                    .as_ref()
                    .and_then(|o| o.files.iter().find_map(FileEntry::from_result));
                match produced {
                    Some(file) => Self {
                        status,
                        title: Some(
                            file.title
                                .clone()
                                .unwrap_or_else(|| naming::stem_of(&file.download_name).to_string()),
                        ),
                        duration: file.duration,
                        size: Some(file.size),
                        filename: Some(file.filename),
                        download_name: Some(file.download_name),
                        ..Self::default()
                    },
                    None => Self::rejected(event.message.clone()),
                }
            }
            EventKind::Error => Self::rejected(event.message.clone()),
            EventKind::Starting | EventKind::Progress => {
                let transfer = event.transfer.unwrap_or_default();
                Self {
                    status,
                    percent: event.percent.map(format_percent),
                    percent_num: event.percent.map(round_percent),
                    speed: transfer.speed_bps.map(format_speed),
                    eta: transfer.eta_secs.map(format_eta),
                    downloaded: transfer.downloaded_bytes.map(format_bytes),
                    total: transfer.total_bytes.map(format_bytes),
                    message: Some(event.message.clone()),
                    ..Self::default()
                }
            }
        }
    }
}

/// One message of the per-job WebSocket.
#[derive(Debug, Serialize)]
pub struct TaskUpdate {
    pub status: &'static str,
    pub progress: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutcome>,
}

impl TaskUpdate {
    /// `fallback_percent` fills in events that carry no percentage.
    pub fn from_event(event: &ProgressEvent, fallback_percent: f64) -> Self {
        Self {
            status: stream_status(event),
            progress: round_percent(event.percent.unwrap_or(fallback_percent)),
            message: event.message.clone(),
            result: event.outcome.clone(),
        }
    }
}

/// Legacy task states understood by polling clients.
pub const TASK_PENDING: &str = "PENDING";
pub const TASK_PROGRESS: &str = "PROGRESS";
pub const TASK_SUCCESS: &str = "SUCCESS";
pub const TASK_FAILURE: &str = "FAILURE";

/// Body of `GET /api/task/{id}/status`.
///
/// `ready` is only set for jobs that produced results; a failed job reports
/// `FAILURE` with `ready: false`.
#[derive(Debug, Serialize)]
pub struct TaskStatus {
    pub status: &'static str,
    pub progress: f64,
    pub ready: bool,
    pub message: String,
    pub result: Option<JobOutcome>,
}

impl TaskStatus {
    pub fn new(
        snapshot: &JobSnapshot,
        latest: Option<&ProgressEvent>,
        outcome: Option<JobOutcome>,
    ) -> Self {
        let status = match snapshot.status {
            JobStatus::Pending => TASK_PENDING,
            JobStatus::Running => TASK_PROGRESS,
            JobStatus::Completed | JobStatus::PartialFailure => TASK_SUCCESS,
            JobStatus::Failed => TASK_FAILURE,
        };
        Self {
            status,
            progress: round_percent(snapshot.progress),
            ready: status == TASK_SUCCESS,
            message: latest.map(|e| e.message.clone()).unwrap_or_default(),
            result: outcome,
        }
    }
}

/// A job snapshot with its most recent progress event.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: JobSnapshot,
    pub latest_event: Option<ProgressEvent>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use magetool_events::TransferStats;

    fn file(original: &str, artifact: Option<&str>, error: Option<&str>) -> FileResult {
        FileResult {
            index: 0,
            original: original.to_string(),
            filename: artifact.map(str::to_string),
            download_name: artifact.map(|_| format!("{}.png", naming::stem_of(original))),
            size: artifact.map(|_| 42),
            title: None,
            duration: None,
            error: error.map(str::to_string),
        }
    }

    fn outcome(status: JobStatus, files: Vec<FileResult>) -> JobOutcome {
        JobOutcome {
            status,
            files,
            error: None,
        }
    }

    #[test]
    fn partial_failure_lists_outputs_and_errors() {
        let outcome = outcome(
            JobStatus::PartialFailure,
            vec![
                file("a.png", Some("aa.png"), None),
                file("corrupt.png", None, Some("Could not decode image")),
            ],
        );
        let body = SubmitResponse::from_outcome(JobId::new(), &outcome, false);

        assert!(body.success);
        assert_eq!(body.files.as_ref().map(Vec::len), Some(1));
        assert_eq!(body.errors.len(), 1);
        assert_eq!(body.errors[0].original, "corrupt.png");
        assert!(body.error.is_none());
    }

    #[test]
    fn single_upload_uses_file_field() {
        let outcome = outcome(JobStatus::Completed, vec![file("a.png", Some("aa.png"), None)]);
        let body = SubmitResponse::from_outcome(JobId::new(), &outcome, true);

        assert!(body.files.is_none());
        assert_eq!(body.file.map(|f| f.download_name), Some("a.png".to_string()));
    }

    #[test]
    fn failed_job_reports_error() {
        let outcome = outcome(
            JobStatus::Failed,
            vec![file("bad.png", None, Some("Could not decode image"))],
        );
        let body = SubmitResponse::from_outcome(JobId::new(), &outcome, false);

        assert!(!body.success);
        assert!(body.files.is_none());
        assert_eq!(body.error.as_deref(), Some("Could not decode image"));
    }

    #[test]
    fn stream_messages_name_their_job() {
        let id = JobId::new();
        let starting = StreamMessage::from_event(&ProgressEvent::starting(id, "Starting"));
        let json = serde_json::to_value(&starting).unwrap();
        assert_eq!(json["status"], "starting");
        assert_eq!(json["job_id"], id.to_string());

        let rejected = serde_json::to_value(StreamMessage::rejected("bad url")).unwrap();
        assert!(rejected.get("job_id").is_none());
    }

    #[test]
    fn downloading_event_formats_transfer() {
        let event = ProgressEvent::progress(JobId::new(), 42.345, "Downloading clip")
            .with_stage(Stage::Downloading)
            .with_transfer(TransferStats {
                speed_bps: Some(1024.0 * 1024.0),
                eta_secs: Some(65),
                downloaded_bytes: Some(10 * 1024 * 1024),
                total_bytes: Some(20 * 1024 * 1024),
            });
        let msg = StreamMessage::from_event(&event);

        assert_eq!(msg.status, "downloading");
        assert_eq!(msg.percent.as_deref(), Some("42.3%"));
        assert_eq!(msg.percent_num, Some(42.3));
        assert_eq!(msg.speed.as_deref(), Some("1.0MiB/s"));
        assert_eq!(msg.eta.as_deref(), Some("01:05"));
        assert_eq!(msg.downloaded.as_deref(), Some("10.0MiB"));
        assert_eq!(msg.total.as_deref(), Some("20.0MiB"));
    }

    #[test]
    fn completed_event_carries_file_details() {
        let mut result = file("https://example.com/clip.mp4", Some("ff.mp4"), None);
        result.download_name = Some("clip.mp4".to_string());
        result.duration = Some(12.5);
        let event = ProgressEvent::completed(
            JobId::new(),
            outcome(JobStatus::Completed, vec![result]),
        );
        let msg = StreamMessage::from_event(&event);

        assert_eq!(msg.status, "complete");
        assert_eq!(msg.filename.as_deref(), Some("ff.mp4"));
        assert_eq!(msg.title.as_deref(), Some("clip"));
        assert_eq!(msg.duration, Some(12.5));
        assert_eq!(msg.size, Some(42));
    }

    #[test]
    fn error_event_becomes_error_message() {
        let event = ProgressEvent::error(JobId::new(), "No storage capacity available", None);
        let msg = StreamMessage::from_event(&event);

        assert_eq!(msg.status, "error");
        assert_eq!(msg.error.as_deref(), Some("No storage capacity available"));
        assert!(msg.percent.is_none());
    }
}
