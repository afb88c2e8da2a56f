//! Progress arithmetic and human-readable transfer formatting.
//!
//! Download-style operations surface percent, speed, ETA and byte counts.
//! The stream endpoint renders them with the helpers below
//! (`"42.3%"`, `"1.2MiB/s"`, `"01:05"`, `"10.0MiB"`).

/// Calculate download progress as a percentage (0.0–100.0).
///
/// Returns `None` if the total size is unknown or zero.
pub fn download_progress_percent(downloaded: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(t) if t > 0 => {
            let pct = (downloaded as f64 / t as f64) * 100.0;
            Some(pct.min(100.0))
        }
        _ => None,
    }
}

/// Estimated seconds remaining at the given throughput.
pub fn eta_secs(downloaded: u64, total: Option<u64>, bytes_per_sec: f64) -> Option<u64> {
    let total = total?;
    if bytes_per_sec <= 0.0 || !bytes_per_sec.is_finite() {
        return None;
    }
    let remaining = total.saturating_sub(downloaded) as f64;
    Some((remaining / bytes_per_sec).ceil() as u64)
}

/// Whether a new percentage is far enough past the last published one.
///
/// `100.0` always passes so the final tick is never swallowed.
pub fn crosses_step(last_published: Option<f64>, current: f64, step: f64) -> bool {
    match last_published {
        None => true,
        Some(last) => (current >= 100.0 && last < 100.0) || current - last >= step,
    }
}

/// Format a percentage like `"42.3%"`.
pub fn format_percent(percent: f64) -> String {
    format!("{:.1}%", percent.clamp(0.0, 100.0))
}

/// Format a byte count using binary units: `"512B"`, `"1.5KiB"`, `"10.0MiB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1}{}", UNITS[unit])
}

/// Format a throughput like `"1.2MiB/s"`.
pub fn format_speed(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return "0B/s".to_string();
    }
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Format an ETA as `"MM:SS"`, or `"H:MM:SS"` past an hour.
pub fn format_eta(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
