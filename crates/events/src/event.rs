//! Progress events emitted while a job runs.

use chrono::Utc;
use magetool_core::job::JobOutcome;
use magetool_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EventKind / Stage
// ---------------------------------------------------------------------------

/// Kind of a [`ProgressEvent`].
///
/// `Completed` and `Error` are terminal: exactly one of them ends every
/// job's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Starting,
    Progress,
    Completed,
    Error,
}

impl EventKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Phase of work a `progress` event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Bytes are being fetched from a remote source.
    Downloading,
    /// Local processing: transcode, merge, encode, store.
    Processing,
}

// ---------------------------------------------------------------------------
// TransferStats
// ---------------------------------------------------------------------------

/// Throughput figures surfaced by download-style transforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_bps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

impl TransferStats {
    pub fn is_empty(&self) -> bool {
        self.speed_bps.is_none()
            && self.eta_secs.is_none()
            && self.downloaded_bytes.is_none()
            && self.total_bytes.is_none()
    }
}

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// One incremental status update about a job.
///
/// Built with the constructors below and published through a
/// [`ProgressChannel`](crate::ProgressChannel), which assigns `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// Position in the job's stream, starting at 0. Assigned on publish.
    pub seq: u64,
    pub kind: EventKind,
    /// Overall job percentage, `0.0..=100.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    pub message: String,
    /// SubTask this event is about, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferStats>,
    /// Result summary, present on terminal events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    pub timestamp: Timestamp,
}

impl ProgressEvent {
    fn new(job_id: JobId, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            job_id,
            seq: 0,
            kind,
            percent: None,
            message: message.into(),
            subtask: None,
            stage: None,
            transfer: None,
            outcome: None,
            timestamp: Utc::now(),
        }
    }

    pub fn starting(job_id: JobId, message: impl Into<String>) -> Self {
        let mut event = Self::new(job_id, EventKind::Starting, message);
        event.percent = Some(0.0);
        event
    }

    pub fn progress(job_id: JobId, percent: f64, message: impl Into<String>) -> Self {
        let mut event = Self::new(job_id, EventKind::Progress, message);
        event.percent = Some(percent.clamp(0.0, 100.0));
        event
    }

    /// Terminal success (including partial failure) carrying the results.
    pub fn completed(job_id: JobId, outcome: JobOutcome) -> Self {
        let message = format!(
            "{} of {} file(s) processed",
            outcome.succeeded().count(),
            outcome.files.len()
        );
        let mut event = Self::new(job_id, EventKind::Completed, message);
        event.percent = Some(100.0);
        event.outcome = Some(outcome);
        event
    }

    /// Terminal failure.
    pub fn error(job_id: JobId, message: impl Into<String>, outcome: Option<JobOutcome>) -> Self {
        let mut event = Self::new(job_id, EventKind::Error, message);
        event.outcome = outcome;
        event
    }

    pub fn with_subtask(mut self, index: usize) -> Self {
        self.subtask = Some(index);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attach transfer figures. Empty stats are dropped.
    pub fn with_transfer(mut self, transfer: TransferStats) -> Self {
        self.transfer = (!transfer.is_empty()).then_some(transfer);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
