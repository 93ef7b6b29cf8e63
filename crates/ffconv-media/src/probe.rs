//! FFprobe media information.

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::command::check_ffprobe;
use crate::context::RunContext;
use crate::error::{MediaError, MediaResult};

/// What ffprobe reports about an input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container duration in seconds, when known
    pub duration: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
    /// Codec of the first video stream
    pub video_codec: Option<String>,
    /// Codec of the first audio stream
    pub audio_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaInfo {
    /// `WIDTHxHEIGHT` of the first video stream.
    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_video {
            write!(f, "video {}", self.video_codec.as_deref().unwrap_or("unknown"))?;
            if let Some(resolution) = self.resolution() {
                write!(f, " {}", resolution)?;
            }
        } else {
            f.write_str("no video")?;
        }

        match (self.has_audio, self.audio_codec.as_deref()) {
            (true, Some(codec)) => write!(f, ", audio {}", codec)?,
            (true, None) => f.write_str(", audio unknown")?,
            (false, _) => f.write_str(", no audio")?,
        }

        match self.duration {
            Some(duration) => write!(f, ", {:.2}s", duration),
            None => f.write_str(", duration unknown"),
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Run ffprobe against a media file and collect its format and streams.
///
/// The ffprobe process is killed if the context is cancelled or expires.
pub async fn probe_media_info(
    ffprobe_path: impl AsRef<Path>,
    ctx: &RunContext,
    path: impl AsRef<Path>,
) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let binary = check_ffprobe(ffprobe_path)?;
    ctx.check()?;

    debug!("Reading media info of {}", path.display());

    let output = Command::new(&binary)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    // Dropping the output future kills the child.
    let output = tokio::select! {
        output = output => output?,
        _ = ctx.expired() => return Err(MediaError::Timeout(ctx.timeout_secs())),
        _ = ctx.token().cancelled() => return Err(MediaError::Cancelled),
    };

    if !output.status.success() {
        return Err(MediaError::ffprobe_failed(
            format!("FFprobe {}", output.status),
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    parse_media_info(&output.stdout)
}

/// Parse the JSON printed by `ffprobe -print_format json -show_format -show_streams`.
pub fn parse_media_info(json: &[u8]) -> MediaResult<MediaInfo> {
    let output: FfprobeOutput = serde_json::from_slice(json)?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    // "N/A" and other unusable values mean the duration is unknown.
    let duration = output
        .format
        .and_then(|format| format.duration)
        .and_then(|d| parse_duration(&d).ok());

    Ok(MediaInfo {
        duration,
        has_video: video.is_some(),
        has_audio: audio.is_some(),
        video_codec: video.and_then(|s| s.codec_name.clone()),
        audio_codec: audio.and_then(|s| s.codec_name.clone()),
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
    })
}

/// Parse a duration in seconds as ffprobe prints it.
pub fn parse_duration(text: &str) -> MediaResult<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(MediaError::InvalidDuration("empty output".to_string()));
    }

    let duration: f64 = trimmed
        .parse()
        .map_err(|_| MediaError::InvalidDuration(trimmed.to_string()))?;

    if !duration.is_finite() || duration < 0.0 {
        return Err(MediaError::InvalidDuration(trimmed.to_string()));
    }

    Ok(duration)
}
