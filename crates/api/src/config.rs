use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use magetool_events::ChannelConfig;
use magetool_pipeline::ToolkitConfig;
use magetool_store::StoreConfig;
use magetool_worker::{ExecutorConfig, RegistryConfig};

/// Headroom left between the synchronous wait and the request timeout.
const SYNC_WAIT_MARGIN: Duration = Duration::from_secs(5);

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `300`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight jobs (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,

    /// Root directory for stored artifacts.
    pub storage_dir: PathBuf,
    /// Working directory for external processes.
    pub scratch_dir: PathBuf,
    /// Lifetime of produced outputs.
    pub artifact_ttl_secs: u64,
    /// Lifetime of uploaded inputs.
    pub input_ttl_secs: u64,
    pub max_storage_bytes: u64,
    /// Request body ceiling for uploads.
    pub max_upload_bytes: usize,

    /// How long finished jobs stay queryable.
    pub job_retention_secs: u64,
    /// Cadence of the artifact reaper and job retention sweeps.
    pub sweep_interval_secs: u64,
    pub subtask_concurrency: usize,
    pub max_concurrent_jobs: usize,
    pub subtask_timeout_secs: u64,
    /// `0` disables the per-client limit.
    pub max_active_jobs_per_client: usize,

    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub ytdlp_bin: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                 |
    /// |------------------------------|-------------------------|
    /// | `HOST`                       | `0.0.0.0`               |
    /// | `PORT`                       | `8000`                  |
    /// | `CORS_ORIGINS`               | `http://localhost:3000` |
    /// | `REQUEST_TIMEOUT_SECS`       | `300`                   |
    /// | `SHUTDOWN_TIMEOUT_SECS`      | `30`                    |
    /// | `LOG_FORMAT`                 | `text` (`json`)         |
    /// | `STORAGE_DIR`                | `./data/artifacts`      |
    /// | `SCRATCH_DIR`                | `./data/scratch`        |
    /// | `ARTIFACT_TTL_SECS`          | `3600`                  |
    /// | `INPUT_TTL_SECS`             | `1800`                  |
    /// | `MAX_STORAGE_BYTES`          | `10737418240` (10 GiB)  |
    /// | `MAX_UPLOAD_BYTES`           | `524288000` (500 MiB)   |
    /// | `JOB_RETENTION_SECS`         | `1800`                  |
    /// | `SWEEP_INTERVAL_SECS`        | `60`                    |
    /// | `SUBTASK_CONCURRENCY`        | `4`                     |
    /// | `MAX_CONCURRENT_JOBS`        | `8`                     |
    /// | `SUBTASK_TIMEOUT_SECS`       | `600`                   |
    /// | `MAX_ACTIVE_JOBS_PER_CLIENT` | `1`                     |
    /// | `FFMPEG_BIN`                 | `ffmpeg`                |
    /// | `FFPROBE_BIN`                | `ffprobe`               |
    /// | `YTDLP_BIN`                  | `yt-dlp`                |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let log_json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Self {
            host,
            port: env_parse("PORT", "8000"),
            cors_origins,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", "300"),
            shutdown_timeout_secs: env_parse("SHUTDOWN_TIMEOUT_SECS", "30"),
            log_json,
            storage_dir: env_parse("STORAGE_DIR", "./data/artifacts"),
            scratch_dir: env_parse("SCRATCH_DIR", "./data/scratch"),
            artifact_ttl_secs: env_parse("ARTIFACT_TTL_SECS", "3600"),
            input_ttl_secs: env_parse("INPUT_TTL_SECS", "1800"),
            max_storage_bytes: env_parse("MAX_STORAGE_BYTES", "10737418240"),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", "524288000"),
            job_retention_secs: env_parse("JOB_RETENTION_SECS", "1800"),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", "60"),
            subtask_concurrency: env_parse("SUBTASK_CONCURRENCY", "4"),
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS", "8"),
            subtask_timeout_secs: env_parse("SUBTASK_TIMEOUT_SECS", "600"),
            max_active_jobs_per_client: env_parse("MAX_ACTIVE_JOBS_PER_CLIENT", "1"),
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".into()),
            ffprobe_bin: std::env::var("FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".into()),
            ytdlp_bin: std::env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".into()),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.storage_dir.clone(),
            default_ttl: Duration::from_secs(self.artifact_ttl_secs),
            max_total_bytes: self.max_storage_bytes,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            retention: Duration::from_secs(self.job_retention_secs),
            max_active_per_client: self.max_active_jobs_per_client,
            channel: ChannelConfig::default(),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            subtask_concurrency: self.subtask_concurrency.max(1),
            max_concurrent_jobs: self.max_concurrent_jobs.max(1),
            subtask_timeout: Duration::from_secs(self.subtask_timeout_secs),
            ..ExecutorConfig::default()
        }
    }

    pub fn toolkit_config(&self) -> ToolkitConfig {
        ToolkitConfig {
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            ffprobe_bin: self.ffprobe_bin.clone(),
            ytdlp_bin: self.ytdlp_bin.clone(),
            scratch_dir: self.scratch_dir.clone(),
            ..ToolkitConfig::default()
        }
    }

    pub fn input_ttl(&self) -> Duration {
        Duration::from_secs(self.input_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// How long a synchronous submit waits for its job before answering
    /// `202`. Stays below the request timeout so the caller always gets
    /// the job id rather than an empty `408`.
    pub fn sync_wait(&self) -> Duration {
        let timeout = Duration::from_secs(self.request_timeout_secs);
        timeout
            .saturating_sub(SYNC_WAIT_MARGIN)
            .max(timeout / 2)
    }
}

/// Read `key` from the environment, falling back to `default`.
///
/// Panics on an unparsable value: misconfiguration fails at startup.
fn env_parse<T>(key: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .unwrap_or_else(|e| panic!("{key} must be a valid value, got '{raw}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_timeout(secs: u64) -> ServerConfig {
        ServerConfig {
            request_timeout_secs: secs,
            ..ServerConfig::from_env()
        }
    }

    #[test]
    fn sync_wait_ends_before_the_request_timeout() {
        assert_eq!(with_timeout(300).sync_wait(), Duration::from_secs(295));
        assert_eq!(with_timeout(6).sync_wait(), Duration::from_secs(3));
        assert_eq!(with_timeout(1).sync_wait(), Duration::from_millis(500));
    }
}
