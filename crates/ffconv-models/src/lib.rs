//! Shared data models for the ffconv media converter.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle status
//! - Conversion options and their validation rules

pub mod job;
pub mod options;

// Re-export common types
pub use job::{Job, JobId, JobStatus, DEFAULT_MAX_LOG_LINES};
pub use options::{
    ConversionOptions, FitMode, PresetMode, ALLOWED_AUDIO_CODECS, ALLOWED_INPUT_FORMATS,
    ALLOWED_OUTPUT_FORMATS, ALLOWED_PRESETS, ALLOWED_VIDEO_CODECS, PRESET_AWARE_CODECS,
};
