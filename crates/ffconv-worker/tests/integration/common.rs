//! Shared fixtures.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use ffconv_models::{JobId, JobStatus};
use ffconv_registry::JobRegistry;
use ffconv_worker::WorkerConfig;

/// Fake ffmpeg that reports progress for a 4 second input and writes its output.
pub const FFMPEG_OK: &str = r#"
echo "$@" >> "$(dirname "$0")/ffmpeg.calls"
echo frame=10
echo out_time_ms=1000
echo progress=continue
echo out_time_ms=2000
echo progress=continue
echo out_time_ms=4000
echo progress=end
for last; do :; done
echo converted > "$last"
"#;

/// Fake ffmpeg that fails the way a bad encoder would.
pub const FFMPEG_FAIL: &str = r#"
echo "$@" >> "$(dirname "$0")/ffmpeg.calls"
echo "[vost#0:0] Unknown encoder 'libfoo'" >&2
exit 1
"#;

/// Fake ffmpeg that never finishes on its own.
pub const FFMPEG_HANG: &str = r#"
echo "$@" >> "$(dirname "$0")/ffmpeg.calls"
exec sleep 30
"#;

/// Fake ffprobe describing a 4 second h264/aac input.
pub const FFPROBE_OK: &str = r#"
cat <<'EOF'
{
    "streams": [
        {"index": 0, "codec_name": "h264", "codec_type": "video", "width": 1280, "height": 720},
        {"index": 1, "codec_name": "aac", "codec_type": "audio"}
    ],
    "format": {"duration": "4.000000"}
}
EOF
"#;

/// Fake ffprobe for an input whose container reports no streams or duration.
pub const FFPROBE_EMPTY: &str = r#"echo '{"streams": [], "format": {"duration": "N/A"}}'"#;

pub const FFPROBE_FAIL: &str = "echo 'Invalid data found when processing input' >&2\nexit 1";

/// Temporary sandbox holding fake binaries, an input file and an output dir.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
}

impl Sandbox {
    pub fn new(ffmpeg: &str, ffprobe: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(&dir.path().join("ffmpeg"), ffmpeg);
        write_script(&dir.path().join("ffprobe"), ffprobe);
        std::fs::write(dir.path().join("input.mov"), b"fake movie").expect("input");
        Self { dir }
    }

    pub fn input(&self) -> PathBuf {
        self.dir.path().join("input.mov")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("outputs")
    }

    /// Number of times the fake ffmpeg was launched.
    pub fn ffmpeg_calls(&self) -> usize {
        std::fs::read_to_string(self.dir.path().join("ffmpeg.calls"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    pub fn config(&self) -> WorkerConfig {
        WorkerConfig {
            ffmpeg_path: self.dir.path().join("ffmpeg"),
            ffprobe_path: self.dir.path().join("ffprobe"),
            output_dir: self.output_dir(),
            shutdown_timeout: Duration::from_secs(5),
            ..WorkerConfig::default()
        }
    }
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).expect("script");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
}

#[cfg(not(unix))]
fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).expect("script");
}

/// Poll until the job reaches `status` or the timeout elapses.
pub async fn wait_for_status(registry: &JobRegistry, id: &JobId, status: JobStatus) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if registry.get(id).is_some_and(|job| job.status == status) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Poll until the job is terminal and return its final status.
pub async fn wait_for_terminal(registry: &JobRegistry, id: &JobId) -> Option<JobStatus> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        match registry.get(id) {
            Some(job) if job.is_terminal() => return Some(job.status),
            None => return None,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    None
}
