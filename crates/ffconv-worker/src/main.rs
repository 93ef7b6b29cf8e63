//! `ffconv` command-line converter.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ffconv_models::{ConversionOptions, FitMode, JobStatus, PresetMode};
use ffconv_registry::JobEvent;
use ffconv_worker::{ConversionService, WorkerConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ffconv: convert media files with ffmpeg",
    long_about = "Runs one conversion through the ffconv job pipeline, streaming status and progress."
)]
struct Cli {
    /// Input media file
    #[arg(value_name = "INPUT", required_unless_present = "schema")]
    input: Option<PathBuf>,

    /// Output container (mp4, mkv, mov, webm, mp3, aac, wav, flac, ogg, m4a)
    #[arg(short, long, required_unless_present = "schema")]
    format: Option<String>,

    /// Display name recorded on the job (defaults to the input file name)
    #[arg(long)]
    name: Option<String>,

    /// Directory converted files are written to
    #[arg(short, long, env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    // --- Video ---
    /// Video codec (copy, libx264, libx265, libvpx-vp9)
    #[arg(long)]
    video_codec: Option<String>,

    /// Video bitrate (e.g., 2M)
    #[arg(long)]
    video_bitrate: Option<String>,

    /// Constant Rate Factor (18-35)
    #[arg(long)]
    crf: Option<u8>,

    /// Encoder preset (ultrafast ... veryslow)
    #[arg(long)]
    preset: Option<String>,

    /// Output frame rate (1-60)
    #[arg(long)]
    fps: Option<u32>,

    /// Drop the video stream
    #[arg(long, default_value_t = false)]
    remove_video: bool,

    /// Target width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Target height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Preserve the source aspect ratio when resizing
    #[arg(long, default_value_t = false)]
    keep_aspect: bool,

    /// Fit mode with --keep-aspect
    #[arg(long, value_parser = ["contain", "cover"])]
    fit: Option<String>,

    // --- Audio ---
    /// Audio codec (copy, aac, libmp3lame, libopus, flac)
    #[arg(long)]
    audio_codec: Option<String>,

    /// Audio bitrate (e.g., 128k)
    #[arg(long)]
    audio_bitrate: Option<String>,

    /// Drop the audio stream
    #[arg(long, default_value_t = false)]
    remove_audio: bool,

    // --- Trim ---
    /// Start offset in seconds
    #[arg(long)]
    trim_start: Option<f64>,

    /// Duration in seconds
    #[arg(long)]
    trim_duration: Option<f64>,

    // --- Container ---
    /// Move the MP4 index to the front of the file
    #[arg(long, default_value_t = false)]
    fast_start: bool,

    /// Drop container metadata
    #[arg(long, default_value_t = false)]
    strip_metadata: bool,

    // --- Runtime ---
    /// Speed policy when no preset is given (low_cpu, balanced, quality)
    #[arg(long, env = "PRESET_MODE")]
    preset_mode: Option<String>,

    /// Number of worker loops
    #[arg(long, env = "WORKERS")]
    workers: Option<usize>,

    /// FFmpeg binary
    #[arg(long, env = "FFMPEG_PATH")]
    ffmpeg: Option<PathBuf>,

    /// FFprobe binary
    #[arg(long, env = "FFPROBE_PATH")]
    ffprobe: Option<PathBuf>,

    /// Print the JSON schema of conversion options and exit
    #[arg(long, default_value_t = false)]
    schema: bool,
}

impl Cli {
    fn options(&self) -> ConversionOptions {
        ConversionOptions {
            output_format: self.format.clone().unwrap_or_default(),
            video_codec: self.video_codec.clone(),
            audio_codec: self.audio_codec.clone(),
            video_bitrate: self.video_bitrate.clone(),
            audio_bitrate: self.audio_bitrate.clone(),
            crf: self.crf,
            preset: self.preset.clone(),
            fps: self.fps,
            remove_audio: self.remove_audio,
            remove_video: self.remove_video,
            trim_start: self.trim_start,
            trim_duration: self.trim_duration,
            resize_width: self.width,
            resize_height: self.height,
            keep_aspect: self.keep_aspect,
            fit_mode: self.fit.as_deref().map(|fit| match fit {
                "cover" => FitMode::Cover,
                _ => FitMode::Contain,
            }),
            fast_start: self.fast_start,
            strip_metadata: self.strip_metadata,
            preset_mode: None,
        }
    }

    fn config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::from_env();
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(path) = &self.ffmpeg {
            config.ffmpeg_path = path.clone();
        }
        if let Some(path) = &self.ffprobe {
            config.ffprobe_path = path.clone();
        }
        if let Some(mode) = &self.preset_mode {
            config.preset_mode = mode.parse().unwrap_or(PresetMode::Unknown);
        }
        config
    }
}

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("ffconv=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing()?;

    if cli.schema {
        let schema = schemars::schema_for!(ConversionOptions);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(ExitCode::SUCCESS);
    }

    let input = cli.input.clone().context("missing INPUT")?;
    let name = cli.name.clone().unwrap_or_else(|| {
        input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    });

    let config = cli.config();
    info!("Worker config: {:?}", config);

    match ffconv_media::check_ffmpeg(&config.ffmpeg_path) {
        Ok(path) => info!("Using FFmpeg at {}", path.display()),
        Err(e) => warn!("{}", e),
    }
    if let Err(e) = ffconv_media::check_ffprobe(&config.ffprobe_path) {
        warn!("{}, progress will not be reported", e);
    }

    let service = ConversionService::start(config);
    let mut events = service.subscribe();

    let job = match service.submit(cli.options(), &input, name).await {
        Ok(job) => job,
        Err(e) => {
            service.shutdown().await;
            return Err(e).context("submission rejected");
        }
    };
    println!("job {} {}", job.id, job.status);

    if !job.is_terminal() {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = tokio::signal::ctrl_c() => {
                    warn!(job_id = %job.id, "Interrupted, canceling job");
                    service.cancel(&job.id);
                    continue;
                }
            };

            match event {
                Ok(event) if event.job_id() == &job.id => match &event {
                    JobEvent::Status { job: snapshot } => {
                        println!("job {} {}", snapshot.id, snapshot.status);
                        if snapshot.is_terminal() {
                            break;
                        }
                    }
                    JobEvent::Progress { progress, .. } => {
                        println!("progress {:.1}%", progress * 100.0);
                    }
                    JobEvent::Log { line, .. } => info!(job_id = %job.id, "{}", line),
                    JobEvent::Deleted { .. } => break,
                },
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged, skipped {} events", skipped);
                    if service.job(&job.id).is_some_and(|j| j.is_terminal()) {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    let finished = service.job(&job.id).context("job disappeared from registry")?;
    println!("{}", serde_json::to_string_pretty(&finished)?);

    service.shutdown().await;

    Ok(if finished.status == JobStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
