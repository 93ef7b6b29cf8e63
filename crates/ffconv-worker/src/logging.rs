//! Structured conversion logging.
//!
//! Every event carries the job id and output format as fields, and the whole
//! run is wrapped in a `conversion` span.

use std::time::Instant;

use ffconv_media::MediaInfo;
use ffconv_models::JobId;
use tracing::{error, info, warn, Span};

/// Tracing front for one conversion run.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    output_format: String,
    started: Instant,
}

impl JobLogger {
    pub fn new(job_id: &JobId, output_format: impl Into<String>) -> Self {
        Self {
            job_id: job_id.clone(),
            output_format: output_format.into(),
            started: Instant::now(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn output_format(&self) -> &str {
        &self.output_format
    }

    /// Seconds since the logger was created.
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Span covering the whole run.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "conversion",
            job_id = %self.job_id,
            format = %self.output_format
        )
    }

    pub fn started(&self, output_filename: &str) {
        info!(
            job_id = %self.job_id,
            format = %self.output_format,
            output = output_filename,
            "Conversion started"
        );
    }

    pub fn probed(&self, info: &MediaInfo) {
        info!(
            job_id = %self.job_id,
            duration_secs = info.duration,
            video_codec = info.video_codec.as_deref(),
            audio_codec = info.audio_codec.as_deref(),
            resolution = info.resolution().as_deref(),
            "Input probed"
        );
    }

    /// A missing duration only disables progress.
    pub fn probe_failed(&self, reason: impl std::fmt::Display) {
        warn!(
            job_id = %self.job_id,
            "Duration unavailable, progress disabled: {}", reason
        );
    }

    pub fn canceled(&self) {
        warn!(
            job_id = %self.job_id,
            elapsed_secs = self.elapsed_secs(),
            "Conversion canceled"
        );
    }

    pub fn failed(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            format = %self.output_format,
            elapsed_secs = self.elapsed_secs(),
            "Conversion failed: {}", message
        );
    }

    pub fn completed(&self, output_filename: &str) {
        info!(
            job_id = %self.job_id,
            format = %self.output_format,
            output = output_filename,
            elapsed_secs = self.elapsed_secs(),
            "Conversion completed"
        );
    }
}
