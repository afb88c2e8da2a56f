//! Platform downloads through a `yt-dlp` child process.
//!
//! yt-dlp runs with `--newline` so each progress update is its own line,
//! and prints the final title, duration and file path through `--print`
//! once post-processing has moved the file into place.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use magetool_events::TransferStats;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::TransformError;
use crate::ffmpeg::{read_capped, spawn_error, tail};
use crate::scratch::ScratchDir;
use crate::transform::{ProgressReporter, TransformOutput, TransformProgress};

/// Separator between fields of the `--print` line.
const FIELD_SEP: char = '\t';

/// `[download]  42.3% of ~10.00MiB at 1.23MiB/s ETA 00:05`
static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[download\]\s+(?P<pct>\d+(?:\.\d+)?)%\s+of\s+~?\s*(?P<total>\d+(?:\.\d+)?\s*[KMGT]?i?B)(?:\s+at\s+(?P<speed>\d+(?:\.\d+)?\s*[KMGT]?i?B)/s)?(?:\s+ETA\s+(?P<eta>\d+(?::\d+){0,2}))?",
    )
    .expect("valid regex")
});

/// One parsed yt-dlp progress line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadLine {
    pub percent: f64,
    pub transfer: TransferStats,
}

/// Final `--print` output: title, duration and on-disk path.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
    pub path: PathBuf,
}

/// Parse a `[download] …%` line.
pub fn parse_progress_line(line: &str) -> Option<DownloadLine> {
    let caps = PROGRESS_RE.captures(line.trim())?;
    let percent: f64 = caps.name("pct")?.as_str().parse().ok()?;
    let total = caps.name("total").and_then(|m| parse_size(m.as_str()));
    let downloaded = total.map(|t| (t as f64 * percent / 100.0).round() as u64);
    Some(DownloadLine {
        percent: percent.clamp(0.0, 100.0),
        transfer: TransferStats {
            speed_bps: caps
                .name("speed")
                .and_then(|m| parse_size(m.as_str()))
                .map(|b| b as f64),
            eta_secs: caps.name("eta").and_then(|m| parse_clock(m.as_str())),
            downloaded_bytes: downloaded,
            total_bytes: total,
        },
    })
}

/// Parse a size like `10.00MiB`, `512KiB`, `1.2GB` or `300B` into bytes.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = s.split_at(split);
    let value: f64 = number.trim().parse().ok()?;
    let multiplier: f64 = match unit.trim() {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" | "kB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

/// Parse `SS`, `MM:SS` or `HH:MM:SS` into seconds.
pub fn parse_clock(s: &str) -> Option<u64> {
    s.trim()
        .split(':')
        .try_fold(0u64, |acc, part| Some(acc * 60 + part.parse::<u64>().ok()?))
}

/// Parse the `--print` line emitted after the file is in place.
pub fn parse_print_line(line: &str) -> Option<DownloadedFile> {
    let mut fields = line.trim_end_matches(|c| c == '\r' || c == '\n').splitn(3, FIELD_SEP);
    let title = fields.next()?;
    let duration = fields.next()?;
    let path = fields.next()?.trim();
    if path.is_empty() {
        return None;
    }
    Some(DownloadedFile {
        title: Some(title.trim().to_string()).filter(|t| !t.is_empty() && t != "NA"),
        duration_secs: duration.trim().parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0),
        path: PathBuf::from(path),
    })
}

fn build_args(output_template: &Path, audio_only: bool, url: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "--newline",
        "--progress",
        "--no-playlist",
        "--no-warnings",
        "--restrict-filenames",
        "--print",
        "after_move:%(title)s\t%(duration)s\t%(filepath)s",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if audio_only {
        args.extend(["-x", "--audio-format", "mp3"].map(String::from));
    } else {
        args.extend(["-f", "bv*+ba/b", "--merge-output-format", "mp4"].map(String::from));
    }
    args.push("-o".to_string());
    args.push(output_template.to_string_lossy().into_owned());
    args.push("--".to_string());
    args.push(url.to_string());
    args
}

/// Download `url` with yt-dlp, reporting transfer progress.
pub async fn download(
    ytdlp: &str,
    scratch_root: &Path,
    url: &str,
    audio_only: bool,
    progress: &ProgressReporter,
) -> Result<TransformOutput, TransformError> {
    let scratch = ScratchDir::create(scratch_root).await?;
    let template = scratch.join("download.%(ext)s");

    progress.report(TransformProgress::downloading(0.0, TransferStats::default()));

    let mut child = Command::new(ytdlp)
        .args(build_args(&template, audio_only, url))
        .current_dir(scratch.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(ytdlp, e))?;

    let stderr_task = tokio::spawn(read_capped(child.stderr.take()));

    let mut downloaded: Option<DownloadedFile> = None;
    let mut last_percent = 0.0_f64;
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(p) = parse_progress_line(&line) {
                // Video and audio streams download one after another and
                // each restarts at 0%; keep the reported value monotonic.
                last_percent = last_percent.max(p.percent);
                progress.report(TransformProgress::downloading(last_percent, p.transfer));
            } else if line.starts_with("[Merger]") || line.starts_with("[ExtractAudio]") || line.starts_with("[VideoConvertor]") {
                progress.report(TransformProgress::processing(last_percent));
            } else if let Some(file) = parse_print_line(&line) {
                downloaded = Some(file);
            }
        }
    }

    let status = child.wait().await?;
    let stderr = stderr_task.await.unwrap_or_default();
    if !status.success() {
        return Err(TransformError::Process {
            program: ytdlp.to_string(),
            exit_code: status.code(),
            stderr: tail(&String::from_utf8_lossy(&stderr), 800),
        });
    }

    let file = match downloaded {
        Some(file) => file,
        None => DownloadedFile {
            title: None,
            duration_secs: None,
            path: first_file(scratch.path()).await?.ok_or_else(|| {
                TransformError::Fetch("yt-dlp finished without producing a file".to_string())
            })?,
        },
    };

    let extension = magetool_core::naming::extension_of(&file.path.to_string_lossy())
        .unwrap_or_else(|| if audio_only { "mp3" } else { "mp4" }.to_string());
    let data = tokio::fs::read(&file.path).await?;
    progress.report(TransformProgress::processing(100.0));

    Ok(TransformOutput::new(data, extension)
        .with_title(file.title)
        .with_duration(file.duration_secs))
}

async fn first_file(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_partial = path
            .extension()
            .is_some_and(|e| e == "part" || e == "ytdl");
        if entry.file_type().await?.is_file() && !is_partial {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_progress_line() {
        let line = "[download]  42.3% of ~10.00MiB at 1.50MiB/s ETA 00:05";
        let p = parse_progress_line(line).unwrap();

        assert_eq!(p.percent, 42.3);
        assert_eq!(p.transfer.total_bytes, Some(10 * 1024 * 1024));
        assert_eq!(p.transfer.speed_bps, Some(1.5 * 1024.0 * 1024.0));
        assert_eq!(p.transfer.eta_secs, Some(5));
        assert_eq!(
            p.transfer.downloaded_bytes,
            Some((10.0 * 1024.0 * 1024.0 * 0.423_f64).round() as u64)
        );
    }

    #[test]
    fn parses_line_without_speed_or_eta() {
        let p = parse_progress_line("[download] 100% of 3.20MiB").unwrap();
        assert_eq!(p.percent, 100.0);
        assert!(p.transfer.speed_bps.is_none());
        assert!(p.transfer.eta_secs.is_none());
    }

    #[test]
    fn unknown_speed_is_ignored() {
        let p = parse_progress_line("[download]   0.0% of 50.00MiB at Unknown B/s ETA Unknown").unwrap();
        assert_eq!(p.percent, 0.0);
        assert!(p.transfer.speed_bps.is_none());
        assert!(p.transfer.eta_secs.is_none());
    }

    #[test]
    fn non_progress_lines_do_not_parse() {
        assert!(parse_progress_line("[youtube] abc: Downloading webpage").is_none());
        assert!(parse_progress_line("[download] Destination: x.mp4").is_none());
    }

    #[test]
    fn sizes_and_clocks() {
        assert_eq!(parse_size("512KiB"), Some(512 * 1024));
        assert_eq!(parse_size("1.5 GB"), Some(1_500_000_000));
        assert_eq!(parse_size("300B"), Some(300));
        assert_eq!(parse_size("12XB"), None);
        assert_eq!(parse_clock("05"), Some(5));
        assert_eq!(parse_clock("01:05"), Some(65));
        assert_eq!(parse_clock("1:02:03"), Some(3723));
        assert_eq!(parse_clock("xx"), None);
    }

    #[test]
    fn parses_print_line() {
        let file = parse_print_line("My Video\t212.0\t/tmp/x/download.mp4").unwrap();
        assert_eq!(file.title.as_deref(), Some("My Video"));
        assert_eq!(file.duration_secs, Some(212.0));
        assert_eq!(file.path, PathBuf::from("/tmp/x/download.mp4"));

        let file = parse_print_line("NA\tNA\t/tmp/x/download.mp3").unwrap();
        assert!(file.title.is_none());
        assert!(file.duration_secs.is_none());

        assert!(parse_print_line("no tabs here").is_none());
    }

    #[test]
    fn args_end_with_url_after_separator() {
        let args = build_args(Path::new("/tmp/s/download.%(ext)s"), true, "https://youtu.be/x");
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args[args.len() - 1], "https://youtu.be/x");
        assert!(args.contains(&"-x".to_string()));
    }
}
