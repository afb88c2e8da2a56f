//! Production [`Transform`] implementation.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::download::{self, SourceKind};
use crate::error::TransformError;
use crate::ffmpeg::{self, FfmpegTools};
use crate::image_ops;
use crate::operation::Operation;
use crate::transform::{ProgressReporter, Transform, TransformInput, TransformOutput, TransformProgress};
use crate::ytdlp;

/// Default cap on a direct download: 2 GiB.
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Binaries and limits used by [`Toolkit`].
#[derive(Debug, Clone)]
pub struct ToolkitConfig {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub ytdlp_bin: String,
    /// Working directory root for external processes.
    pub scratch_dir: PathBuf,
    pub max_download_bytes: u64,
    pub connect_timeout: Duration,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            ytdlp_bin: "yt-dlp".to_string(),
            scratch_dir: std::env::temp_dir().join("magetool-scratch"),
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Dispatches each [`Operation`] to the tool that implements it.
pub struct Toolkit {
    config: ToolkitConfig,
    ffmpeg: FfmpegTools,
    http: reqwest::Client,
}

impl Toolkit {
    pub fn new(config: ToolkitConfig) -> Result<Self, TransformError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("magetool/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            ffmpeg: FfmpegTools {
                ffmpeg: config.ffmpeg_bin.clone(),
                ffprobe: config.ffprobe_bin.clone(),
            },
            config,
            http,
        })
    }

    pub fn config(&self) -> &ToolkitConfig {
        &self.config
    }

    async fn run_image(
        &self,
        op: &Operation,
        input: TransformInput,
        progress: &ProgressReporter,
    ) -> Result<TransformOutput, TransformError> {
        let (data, _) = input.into_bytes()?;
        progress.report(TransformProgress::processing(0.0));
        let op = op.clone();
        let output = tokio::task::spawn_blocking(move || image_ops::apply(&op, &data))
            .await
            .map_err(|e| TransformError::Internal(format!("image worker failed: {e}")))??;
        progress.report(TransformProgress::processing(100.0));
        Ok(output)
    }

    async fn run_download(
        &self,
        input: TransformInput,
        audio_only: bool,
        progress: &ProgressReporter,
    ) -> Result<TransformOutput, TransformError> {
        let url = input.into_url()?;
        match download::detect_source(&url) {
            SourceKind::Platform => {
                ytdlp::download(&self.config.ytdlp_bin, &self.config.scratch_dir, &url, audio_only, progress)
                    .await
            }
            SourceKind::Direct => {
                download::fetch(&self.http, &url, self.config.max_download_bytes, progress).await
            }
        }
    }
}

#[async_trait]
impl Transform for Toolkit {
    async fn apply(
        &self,
        op: &Operation,
        input: TransformInput,
        progress: ProgressReporter,
    ) -> Result<TransformOutput, TransformError> {
        match op {
            Operation::ImageConvert { .. }
            | Operation::ImageResize { .. }
            | Operation::ImageUpscale { .. }
            | Operation::ImageFilter { .. }
            | Operation::ImageCrop { .. } => self.run_image(op, input, &progress).await,
            Operation::MediaConvert { .. } | Operation::ExtractAudio { .. } | Operation::AudioTrim { .. } => {
                let (data, file_name) = input.into_bytes()?;
                ffmpeg::run(&self.ffmpeg, &self.config.scratch_dir, op, &data, &file_name, &progress).await
            }
            Operation::MediaDownload { audio_only } => self.run_download(input, *audio_only, &progress).await,
        }
    }
}
