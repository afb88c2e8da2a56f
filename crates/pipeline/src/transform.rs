//! The transform seam.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use magetool_events::{Stage, TransferStats};

use crate::error::TransformError;
use crate::operation::Operation;

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

/// What a transform consumes.
#[derive(Debug, Clone)]
pub enum TransformInput {
    /// File contents read from the artifact store.
    Bytes {
        data: Vec<u8>,
        file_name: String,
        content_type: String,
    },
    /// A remote source the transform fetches itself.
    Url(String),
}

impl TransformInput {
    pub fn display_name(&self) -> &str {
        match self {
            Self::Bytes { file_name, .. } => file_name,
            Self::Url(url) => url,
        }
    }

    /// Consume as `(bytes, file_name)`; URL inputs are rejected.
    pub fn into_bytes(self) -> Result<(Vec<u8>, String), TransformError> {
        match self {
            Self::Bytes { data, file_name, .. } => Ok((data, file_name)),
            Self::Url(_) => Err(TransformError::InvalidInput(
                "This operation needs an uploaded file, not a URL".to_string(),
            )),
        }
    }

    pub fn into_url(self) -> Result<String, TransformError> {
        match self {
            Self::Url(url) => Ok(url),
            Self::Bytes { .. } => Err(TransformError::InvalidInput(
                "This operation needs a source URL".to_string(),
            )),
        }
    }
}

/// What a successful transform produces.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub data: Vec<u8>,
    /// Extension of the produced file, without the dot.
    pub extension: String,
    pub content_type: String,
    /// Media title, for downloads.
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
}

impl TransformOutput {
    pub fn new(data: Vec<u8>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            content_type: magetool_core::naming::content_type_for_extension(&extension).to_string(),
            data,
            extension,
            title: None,
            duration_secs: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_duration(mut self, duration_secs: Option<f64>) -> Self {
        self.duration_secs = duration_secs.filter(|d| d.is_finite() && *d >= 0.0);
        self
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// One progress signal from a running transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformProgress {
    /// Percent of this transform done, `0.0..=100.0`.
    pub percent: f64,
    pub stage: Stage,
    pub transfer: TransferStats,
}

impl TransformProgress {
    pub fn processing(percent: f64) -> Self {
        Self {
            percent,
            stage: Stage::Processing,
            transfer: TransferStats::default(),
        }
    }

    pub fn downloading(percent: f64, transfer: TransferStats) -> Self {
        Self {
            percent,
            stage: Stage::Downloading,
            transfer,
        }
    }
}

/// Callback a transform uses to surface progress.
///
/// Calls must be cheap and never block; the receiving side decides what to
/// publish.
#[derive(Clone)]
pub struct ProgressReporter(Arc<dyn Fn(TransformProgress) + Send + Sync>);

impl ProgressReporter {
    pub fn new(f: impl Fn(TransformProgress) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A reporter that discards everything.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, progress: TransformProgress) {
        (self.0)(progress)
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressReporter")
    }
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// External processing collaborator invoked once per SubTask.
///
/// Implementations must not panic on bad input; they return a
/// [`TransformError`] instead. The executor still isolates panics.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn apply(
        &self,
        op: &Operation,
        input: TransformInput,
        progress: ProgressReporter,
    ) -> Result<TransformOutput, TransformError>;
}
