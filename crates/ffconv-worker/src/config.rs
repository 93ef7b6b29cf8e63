//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use ffconv_models::{PresetMode, DEFAULT_MAX_LOG_LINES};

/// Longest timeout accepted from the environment (30 days).
pub const MAX_TIMEOUT_SECS: u64 = 30 * 24 * 60 * 60;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker loops
    pub workers: usize,
    /// Pending-job buffer size; defaults to twice the worker count
    pub queue_capacity: usize,
    /// Speed policy for jobs that don't name one
    pub preset_mode: PresetMode,
    /// FFmpeg binary name or path
    pub ffmpeg_path: PathBuf,
    /// FFprobe binary name or path
    pub ffprobe_path: PathBuf,
    /// Log lines retained per job
    pub max_log_lines: usize,
    /// Upper bound on a single conversion
    pub job_timeout: Duration,
    /// Upper bound on the duration probe
    pub probe_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Directory converted files are written to
    pub output_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_capacity: 2,
            preset_mode: PresetMode::Balanced,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            max_log_lines: DEFAULT_MAX_LOG_LINES,
            job_timeout: Duration::from_secs(2 * 60 * 60), // 2 hours
            probe_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            output_dir: PathBuf::from("./outputs"),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let workers = std::env::var("WORKERS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1);

        Self {
            workers,
            queue_capacity: std::env::var("QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(workers * 2),
            preset_mode: std::env::var("PRESET_MODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            ffprobe_path: std::env::var("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffprobe")),
            max_log_lines: std::env::var("LOG_RING_BUFFER_SIZE")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_LOG_LINES),
            job_timeout: timeout_from(std::env::var("JOB_TIMEOUT_SECS").ok(), 7200),
            probe_timeout: timeout_from(std::env::var("PROBE_TIMEOUT_SECS").ok(), 30),
            shutdown_timeout: timeout_from(std::env::var("SHUTDOWN_TIMEOUT_SECS").ok(), 30),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./outputs")),
        }
    }

    /// Set the worker count and resize the queue to match.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self.queue_capacity = self.workers * 2;
        self
    }
}

/// Parse a timeout in seconds, clamped to [`MAX_TIMEOUT_SECS`].
fn timeout_from(value: Option<String>, default_secs: u64) -> Duration {
    let secs = value
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs.min(MAX_TIMEOUT_SECS))
}
