//! Source detection and direct HTTP downloads.

use std::time::Instant;

use futures::StreamExt;
use magetool_core::naming;
use magetool_core::progress::{download_progress_percent, eta_secs};
use magetool_events::TransferStats;

use crate::error::TransformError;
use crate::transform::{ProgressReporter, TransformOutput, TransformProgress};

// ---------------------------------------------------------------------------
// Source detection
// ---------------------------------------------------------------------------

/// Hosts handled by yt-dlp rather than a plain HTTP fetch.
pub const PLATFORM_HOSTS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "instagram.com",
    "tiktok.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "fb.watch",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
    "reddit.com",
    "soundcloud.com",
];

/// How a source URL is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A media platform page; needs yt-dlp to resolve.
    Platform,
    /// A plain file URL.
    Direct,
}

/// Classify `url` by its host.
pub fn detect_source(url: &str) -> SourceKind {
    let host = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
    match host {
        Some(host)
            if PLATFORM_HOSTS
                .iter()
                .any(|p| host == *p || host.ends_with(&format!(".{p}"))) =>
        {
            SourceKind::Platform
        }
        _ => SourceKind::Direct,
    }
}

/// File name implied by a URL's last path segment.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(naming::sanitize_file_name(segment))
}

// ---------------------------------------------------------------------------
// Direct download
// ---------------------------------------------------------------------------

/// Fetch `url` into memory, reporting throughput as bytes arrive.
///
/// Fails with [`TransformError::Fetch`] on HTTP errors and when the body
/// exceeds `max_bytes`.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    max_bytes: u64,
    progress: &ProgressReporter,
) -> Result<TransformOutput, TransformError> {
    progress.report(TransformProgress::downloading(0.0, TransferStats::default()));

    let response = client.get(url).send().await?.error_for_status()?;
    let total = response.content_length();
    if let Some(total) = total.filter(|t| *t > max_bytes) {
        return Err(TransformError::Fetch(format!(
            "Remote file is {total} bytes, limit is {max_bytes}"
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let file_name = file_name_from_url(response.url().as_str());

    let started = Instant::now();
    let mut data: Vec<u8> = Vec::with_capacity(total.unwrap_or(0).min(max_bytes) as usize);
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if data.len() as u64 + chunk.len() as u64 > max_bytes {
            return Err(TransformError::Fetch(format!(
                "Remote file exceeds the {max_bytes} byte limit"
            )));
        }
        data.extend_from_slice(&chunk);

        let downloaded = data.len() as u64;
        let elapsed = started.elapsed().as_secs_f64();
        let speed = (elapsed > 0.0).then(|| downloaded as f64 / elapsed);
        progress.report(TransformProgress::downloading(
            download_progress_percent(downloaded, total).unwrap_or(0.0),
            TransferStats {
                speed_bps: speed,
                eta_secs: speed.and_then(|s| eta_secs(downloaded, total, s)),
                downloaded_bytes: Some(downloaded),
                total_bytes: total,
            },
        ));
    }

    if data.is_empty() {
        return Err(TransformError::Fetch("Remote file is empty".to_string()));
    }

    let extension = file_name
        .as_deref()
        .and_then(naming::extension_of)
        .or_else(|| {
            content_type
                .as_deref()
                .and_then(naming::extension_for_content_type)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "bin".to_string());
    let title = file_name.as_deref().map(|n| naming::stem_of(n).to_string());

    let mut output = TransformOutput::new(data, extension).with_title(title);
    if let Some(ct) = content_type.filter(|ct| !ct.starts_with("text/html")) {
        output.content_type = ct;
    }
    Ok(output)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
