//! FFmpeg CLI wrapper for media conversion.
//!
//! This crate provides:
//! - Deterministic FFmpeg command building from [`ConversionOptions`]
//! - Progress parsing from `-progress pipe:1`
//! - Cancellation and deadlines via [`RunContext`]
//! - Format and stream metadata through FFprobe
//!
//! [`ConversionOptions`]: ffconv_models::ConversionOptions

pub mod command;
pub mod context;
pub mod error;
pub mod filters;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner, STDERR_TAIL_LINES};
pub use context::RunContext;
pub use error::{MediaError, MediaResult};
pub use probe::{parse_duration, parse_media_info, probe_media_info, MediaInfo};
pub use progress::{ProgressDecoder, ProgressEvent};
