//! Conversion options.
//!
//! Every optional knob is an `Option`: absence means "let the encoder pick",
//! which is not the same as a zero value.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

/// Output containers the converter accepts.
pub const ALLOWED_OUTPUT_FORMATS: &[&str] = &[
    "mp4", "mkv", "mov", "webm", "mp3", "aac", "wav", "flac", "ogg", "m4a",
];
/// Input containers the upload layer accepts.
pub const ALLOWED_INPUT_FORMATS: &[&str] = &[
    "mp4", "mkv", "mov", "webm", "mp3", "aac", "wav", "flac", "ogg", "avi", "m4a",
];
/// Video codecs that may be requested.
pub const ALLOWED_VIDEO_CODECS: &[&str] = &["copy", "libx264", "libx265", "libvpx-vp9"];
/// Audio codecs that may be requested.
pub const ALLOWED_AUDIO_CODECS: &[&str] = &["copy", "aac", "libmp3lame", "libopus", "flac"];
/// Encoder speed presets.
pub const ALLOWED_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Software encoders that honor `-preset`.
pub const PRESET_AWARE_CODECS: &[&str] = &["libx264", "libx265"];

/// How a requested box is reconciled with the source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Scale to fit inside the box and letterbox the rest
    #[default]
    Contain,
    /// Scale to fill the box and crop the overflow
    Cover,
}

impl FitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitMode::Contain => "contain",
            FitMode::Cover => "cover",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global quality-vs-speed policy used when no explicit preset is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresetMode {
    /// Favor speed on constrained hosts
    LowCpu,
    /// Reasonable speed and size
    #[default]
    Balanced,
    /// Favor output quality
    Quality,
    /// Any unrecognized policy name
    #[serde(other)]
    Unknown,
}

impl PresetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetMode::LowCpu => "low_cpu",
            PresetMode::Balanced => "balanced",
            PresetMode::Quality => "quality",
            PresetMode::Unknown => "unknown",
        }
    }

    /// Encoder preset implied by this policy.
    pub fn default_preset(&self) -> &'static str {
        match self {
            PresetMode::LowCpu => "veryfast",
            PresetMode::Balanced => "fast",
            PresetMode::Quality => "slow",
            PresetMode::Unknown => "fast",
        }
    }
}

impl FromStr for PresetMode {
    type Err = std::convert::Infallible;

    /// Never fails: unrecognized names map to [`PresetMode::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "low_cpu" => PresetMode::LowCpu,
            "balanced" => PresetMode::Balanced,
            "quality" => PresetMode::Quality,
            _ => PresetMode::Unknown,
        })
    }
}

impl fmt::Display for PresetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested transformation. Built once per job and never mutated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema, Validate)]
#[validate(schema(function = "validate_choices"))]
pub struct ConversionOptions {
    /// Target container (e.g., "mp4", "webm")
    pub output_format: String,

    /// Video codec (e.g., "libx264", "copy")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,

    /// Audio codec (e.g., "aac", "libopus")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,

    /// Video bitrate (e.g., "2M")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<String>,

    /// Audio bitrate (e.g., "128k")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,

    /// Constant Rate Factor (lower is better quality)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 18, max = 35))]
    pub crf: Option<u8>,

    /// Encoder speed preset; overrides `preset_mode`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,

    /// Target frame rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 60))]
    pub fps: Option<u32>,

    /// Drop the audio stream entirely
    #[serde(default)]
    pub remove_audio: bool,

    /// Drop the video stream entirely
    #[serde(default)]
    pub remove_video: bool,

    /// Trim start offset in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0))]
    pub trim_start: Option<f64>,

    /// Trim duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0))]
    pub trim_duration: Option<f64>,

    /// Target width in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub resize_width: Option<u32>,

    /// Target height in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub resize_height: Option<u32>,

    /// Preserve the source aspect ratio when resizing
    #[serde(default)]
    pub keep_aspect: bool,

    /// Fit mode when preserving aspect ratio (contain if absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit_mode: Option<FitMode>,

    /// Move the MP4 index to the front of the file
    #[serde(default)]
    pub fast_start: bool,

    /// Drop container and stream metadata
    #[serde(default)]
    pub strip_metadata: bool,

    /// Speed policy used when `preset` is absent (service default if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_mode: Option<PresetMode>,
}

impl ConversionOptions {
    /// Create options for a target format with everything else unset.
    pub fn new(output_format: impl Into<String>) -> Self {
        Self {
            output_format: output_format.into(),
            ..Default::default()
        }
    }

    /// Validate ranges and allowlists.
    pub fn check(&self) -> Result<(), ValidationErrors> {
        self.validate()
    }

    /// Lower-cased output format.
    pub fn normalized_format(&self) -> String {
        self.output_format.trim().to_ascii_lowercase()
    }

    /// Preset to apply: explicit one if given, otherwise derived from the policy.
    pub fn effective_preset(&self) -> &str {
        self.preset
            .as_deref()
            .unwrap_or_else(|| self.preset_mode.unwrap_or_default().default_preset())
    }

    /// Whether the chosen video codec honors `-preset`.
    pub fn codec_uses_preset(&self) -> bool {
        self.video_codec
            .as_deref()
            .is_some_and(|codec| PRESET_AWARE_CODECS.contains(&codec))
    }

    /// Effective fit mode.
    pub fn fit(&self) -> FitMode {
        self.fit_mode.unwrap_or_default()
    }

    pub fn with_video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = Some(codec.into());
        self
    }

    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = Some(codec.into());
        self
    }

    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = Some(crf);
        self
    }

    pub fn with_preset_mode(mut self, mode: PresetMode) -> Self {
        self.preset_mode = Some(mode);
        self
    }

    pub fn with_resize(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.resize_width = width;
        self.resize_height = height;
        self
    }
}

fn choice_error(code: &'static str, value: &str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(format!("{} not allowed: {}", code, value).into());
    err.add_param("value".into(), &value);
    err
}

fn validate_choices(opts: &ConversionOptions) -> Result<(), ValidationError> {
    let format = opts.normalized_format();
    if format.is_empty() {
        let mut err = ValidationError::new("output_format");
        err.message = Some("output_format is required".into());
        return Err(err);
    }
    if !ALLOWED_OUTPUT_FORMATS.contains(&format.as_str()) {
        return Err(choice_error("output_format", &opts.output_format));
    }
    if let Some(codec) = opts.video_codec.as_deref() {
        if !ALLOWED_VIDEO_CODECS.contains(&codec) {
            return Err(choice_error("video_codec", codec));
        }
    }
    if let Some(codec) = opts.audio_codec.as_deref() {
        if !ALLOWED_AUDIO_CODECS.contains(&codec) {
            return Err(choice_error("audio_codec", codec));
        }
    }
    if let Some(preset) = opts.preset.as_deref() {
        if !ALLOWED_PRESETS.contains(&preset) {
            return Err(choice_error("preset", preset));
        }
    }
    Ok(())
}
