//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use ffconv_models::ConversionOptions;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::{MediaError, MediaResult};
use crate::filters::build_resize_filter;
use crate::progress::{ProgressDecoder, ProgressEvent};

/// Number of trailing stderr lines kept for error reports.
pub const STDERR_TAIL_LINES: usize = 40;

/// Builder for FFmpeg commands.
///
/// Arguments are emitted as
/// `-i <input> -progress pipe:1 -v <level> <output args...> -y <output>`.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after the progress and log flags)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "warning".to_string(),
        }
    }

    /// Translate validated options into a command.
    ///
    /// Pure: the same options and paths always give the same arguments.
    /// Options are expected to be validated already.
    pub fn from_options(
        opts: &ConversionOptions,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Self {
        let mut cmd = Self::new(input, output);

        if let Some(start) = opts.trim_start {
            cmd = cmd.seek(start);
        }
        if let Some(duration) = opts.trim_duration {
            cmd = cmd.duration(duration);
        }

        if opts.remove_video {
            cmd = cmd.no_video();
        } else {
            if let Some(codec) = opts.video_codec.as_deref() {
                cmd = cmd.video_codec(codec);
            }
            if opts.codec_uses_preset() {
                cmd = cmd.preset(opts.effective_preset());
            }
            if let Some(crf) = opts.crf {
                cmd = cmd.crf(crf);
            }
            if let Some(bitrate) = opts.video_bitrate.as_deref() {
                cmd = cmd.video_bitrate(bitrate);
            }
            if let Some(fps) = opts.fps {
                cmd = cmd.fps(fps);
            }
            if let Some(filter) = build_resize_filter(opts) {
                cmd = cmd.video_filter(filter);
            }
        }

        if opts.remove_audio {
            cmd = cmd.no_audio();
        } else {
            if let Some(codec) = opts.audio_codec.as_deref() {
                cmd = cmd.audio_codec(codec);
            }
            if let Some(bitrate) = opts.audio_bitrate.as_deref() {
                cmd = cmd.audio_bitrate(bitrate);
            }
        }

        if opts.strip_metadata {
            cmd = cmd.strip_metadata();
        }
        if opts.fast_start && cmd.output_is_mp4() {
            cmd = cmd.fast_start();
        }

        cmd
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Start offset in seconds.
    pub fn seek(self, seconds: f64) -> Self {
        self.output_arg("-ss").output_arg(format!("{:.2}", seconds))
    }

    /// Duration in seconds.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.2}", seconds))
    }

    /// Drop the video stream.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Drop the audio stream.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set video bitrate.
    pub fn video_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:v").output_arg(bitrate)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Set output frame rate.
    pub fn fps(self, fps: u32) -> Self {
        self.output_arg("-r").output_arg(fps.to_string())
    }

    /// Drop global metadata.
    pub fn strip_metadata(self) -> Self {
        self.output_args(["-map_metadata", "-1"])
    }

    /// Relocate the MP4 index to the front of the file.
    pub fn fast_start(self) -> Self {
        self.output_args(["-movflags", "+faststart"])
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    fn output_is_mp4(&self) -> bool {
        self.output
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.output_args.len() + 8);

        // Input file
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        // Progress as key=value on stdout
        args.push("-progress".to_string());
        args.push("pipe:1".to_string());

        // Log level
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.output_args.iter().cloned());

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    ffmpeg_path: PathBuf,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRunner {
    /// Create a runner for the given binary name or path.
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    /// Run a command to completion.
    ///
    /// `sink` is called for each progress update, and only when
    /// `total_duration` is known and positive. The child is killed when the
    /// context is cancelled or its deadline passes.
    pub async fn run<F>(
        &self,
        ctx: &RunContext,
        cmd: &FfmpegCommand,
        total_duration: Option<f64>,
        sink: F,
    ) -> MediaResult<()>
    where
        F: Fn(ProgressEvent) + Send + 'static,
    {
        if !cmd.input().exists() {
            return Err(MediaError::FileNotFound(cmd.input().to_path_buf()));
        }

        let binary = check_ffmpeg(&self.ffmpeg_path)?;
        ctx.check()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", binary.display(), args.join(" "));

        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stderr not captured"))?;

        let decoder = ProgressDecoder::new(total_duration);
        let progress_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(event) = decoder.decode(&line) {
                    sink(event);
                } else if let Some(out_time_ms) = ProgressDecoder::out_time_ms(&line) {
                    debug!(out_time_ms, "FFmpeg progress without known duration");
                }
            }
        });

        let stderr_handle = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail).join("\n")
        });

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = ctx.expired() => Outcome::TimedOut,
            _ = ctx.token().cancelled() => Outcome::Cancelled,
        };

        let interrupted = match outcome {
            Outcome::Exited(status) => Ok(status?),
            Outcome::TimedOut => {
                warn!(
                    "FFmpeg timed out after {} seconds, killing process",
                    ctx.timeout_secs()
                );
                Err(MediaError::Timeout(ctx.timeout_secs()))
            }
            Outcome::Cancelled => {
                info!("FFmpeg cancelled, killing process");
                Err(MediaError::Cancelled)
            }
        };

        let status = match interrupted {
            Ok(status) => status,
            Err(err) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill FFmpeg process: {}", e);
                }
                // Orphaned grandchildren may still hold the pipes open.
                progress_handle.abort();
                stderr_handle.abort();
                return Err(err);
            }
        };

        let _ = progress_handle.await;
        let diagnostics = stderr_handle.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            let message = if diagnostics.trim().is_empty() {
                format!("ffmpeg {}", status)
            } else {
                format!("ffmpeg {}: {}", status, diagnostics.trim())
            };
            Err(MediaError::ffmpeg_failed(
                message,
                Some(diagnostics),
                status.code(),
            ))
        }
    }
}

/// Resolve the FFmpeg binary.
pub fn check_ffmpeg(path: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let path = path.as_ref();
    which::which(path).map_err(|_| MediaError::FfmpegNotFound(path.display().to_string()))
}

/// Resolve the FFprobe binary.
pub fn check_ffprobe(path: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let path = path.as_ref();
    which::which(path).map_err(|_| MediaError::FfprobeNotFound(path.display().to_string()))
}
