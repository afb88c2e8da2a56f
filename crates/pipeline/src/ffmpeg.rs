//! Audio / video operations on an `ffmpeg` child process.
//!
//! Progress comes from ffmpeg's machine-readable `-progress pipe:1` output
//! (`out_time_us=` lines) measured against the input duration reported by
//! `ffprobe`. Without a known duration the call reports only start and end.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::error::TransformError;
use crate::operation::Operation;
use crate::scratch::ScratchDir;
use crate::transform::{ProgressReporter, TransformOutput, TransformProgress};

/// Most stderr kept for error messages.
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// Characters of stderr carried in a [`TransformError::Process`].
const STDERR_TAIL_CHARS: usize = 800;

/// Binaries used by this module.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ffprobe
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Media duration in seconds, or `None` if ffprobe cannot tell.
pub async fn probe_duration(ffprobe: &str, path: &Path) -> Option<f64> {
    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_probe_duration(&output.stdout)
}

fn parse_probe_duration(json: &[u8]) -> Option<f64> {
    let probe: FfprobeOutput = serde_json::from_slice(json).ok()?;
    probe
        .format
        .duration?
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

// ---------------------------------------------------------------------------
// Argument building
// ---------------------------------------------------------------------------

/// Output arguments (between input and output path) and output extension.
pub fn output_args(op: &Operation, input_ext: &str) -> Result<(Vec<String>, String), TransformError> {
    let args: Vec<&str>;
    let ext: String;
    match op {
        Operation::MediaConvert { target_format } => {
            args = codec_args(target_format);
            ext = target_format.clone();
        }
        Operation::ExtractAudio { format } => {
            let mut a = vec!["-vn"];
            a.extend(codec_args(format));
            a.dedup();
            args = a;
            ext = format.clone();
        }
        Operation::AudioTrim { start_secs, end_secs } => {
            let ext = if input_ext.is_empty() || input_ext == "bin" {
                "mp3".to_string()
            } else {
                input_ext.to_string()
            };
            let args = vec![
                "-ss".to_string(),
                format!("{start_secs:.3}"),
                "-to".to_string(),
                format!("{end_secs:.3}"),
            ];
            return Ok((args, ext));
        }
        other => {
            return Err(TransformError::Unsupported(format!(
                "{other} is not an audio/video operation"
            )))
        }
    }
    Ok((args.into_iter().map(str::to_string).collect(), ext))
}

fn codec_args(format: &str) -> Vec<&'static str> {
    match format {
        "gif" => vec!["-vf", "fps=10,scale=480:-1:flags=lanczos", "-loop", "0"],
        "mp3" => vec!["-vn", "-c:a", "libmp3lame", "-q:a", "2"],
        "wav" | "ogg" | "flac" | "aac" | "m4a" => vec!["-vn"],
        "webm" => vec!["-c:v", "libvpx-vp9", "-b:v", "0", "-crf", "32", "-c:a", "libopus"],
        "mp4" | "mov" | "mkv" => vec!["-c:v", "libx264", "-preset", "veryfast", "-crf", "23", "-c:a", "aac"],
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Progress parsing
// ---------------------------------------------------------------------------

/// One meaningful line of `-progress` output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    /// Output timestamp reached, in seconds.
    OutTime(f64),
    /// `progress=end`.
    End,
}

pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // Both keys carry microseconds.
        "out_time_us" | "out_time_ms" => value
            .parse::<i64>()
            .ok()
            .filter(|us| *us >= 0)
            .map(|us| ProgressLine::OutTime(us as f64 / 1_000_000.0)),
        "progress" if value == "end" => Some(ProgressLine::End),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run `op` over `data` and return the produced file.
pub async fn run(
    tools: &FfmpegTools,
    scratch_root: &Path,
    op: &Operation,
    data: &[u8],
    file_name: &str,
    progress: &ProgressReporter,
) -> Result<TransformOutput, TransformError> {
    let input_ext = magetool_core::naming::extension_of(file_name).unwrap_or_else(|| "bin".to_string());
    let (args, output_ext) = output_args(op, &input_ext)?;

    let scratch = ScratchDir::create(scratch_root).await?;
    let input_path = scratch.join(&format!("input.{input_ext}"));
    let output_path = scratch.join(&format!("output.{output_ext}"));
    tokio::fs::write(&input_path, data).await?;

    let duration = match op {
        Operation::AudioTrim { start_secs, end_secs } => Some(end_secs - start_secs),
        _ => probe_duration(&tools.ffprobe, &input_path).await,
    };

    progress.report(TransformProgress::processing(0.0));

    let mut child = Command::new(&tools.ffmpeg)
        .args(["-hide_banner", "-nostdin", "-y", "-i"])
        .arg(&input_path)
        .args(&args)
        .args(["-progress", "pipe:1", "-nostats"])
        .arg(&output_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(&tools.ffmpeg, e))?;

    let stderr_task = tokio::spawn(read_capped(child.stderr.take()));

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match (parse_progress_line(&line), duration) {
                (Some(ProgressLine::OutTime(t)), Some(total)) => {
                    let percent = (t / total * 100.0).clamp(0.0, 99.0);
                    progress.report(TransformProgress::processing(percent));
                }
                (Some(ProgressLine::End), _) => break,
                _ => {}
            }
        }
    }

    let status = child.wait().await?;
    let stderr = stderr_task.await.unwrap_or_default();
    if !status.success() {
        return Err(TransformError::Process {
            program: tools.ffmpeg.clone(),
            exit_code: status.code(),
            stderr: tail(&String::from_utf8_lossy(&stderr), STDERR_TAIL_CHARS),
        });
    }

    let output = tokio::fs::read(&output_path).await?;
    if output.is_empty() {
        return Err(TransformError::Encode("ffmpeg produced an empty file".to_string()));
    }
    progress.report(TransformProgress::processing(100.0));

    Ok(TransformOutput::new(output, output_ext).with_duration(duration))
}

pub(crate) fn spawn_error(program: &str, e: std::io::Error) -> TransformError {
    if e.kind() == std::io::ErrorKind::NotFound {
        TransformError::MissingBinary {
            program: program.to_string(),
            source: e,
        }
    } else {
        TransformError::Io(e)
    }
}

/// Read a child's output stream, capped at [`MAX_STDERR_BYTES`].
pub(crate) async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h.take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
    }
    buf
}

/// Last `max_chars` characters of `s`, trimmed.
pub(crate) fn tail(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_string();
    }
    s.chars().skip(count - max_chars).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
