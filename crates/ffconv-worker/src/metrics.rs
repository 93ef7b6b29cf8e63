//! Conversion metrics.
//!
//! Recorded through the `metrics` facade; installing a recorder is left to
//! the embedding application.

use ffconv_models::JobStatus;
use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "ffconv_jobs_submitted_total";
    pub const JOBS_REJECTED_TOTAL: &str = "ffconv_jobs_rejected_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "ffconv_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "ffconv_jobs_failed_total";
    pub const JOBS_CANCELED_TOTAL: &str = "ffconv_jobs_canceled_total";
    pub const JOBS_IN_FLIGHT: &str = "ffconv_jobs_in_flight";
    pub const FFMPEG_DURATION_SECONDS: &str = "ffconv_ffmpeg_duration_seconds";
}

/// Record a job accepted by the service.
pub fn record_job_submitted(output_format: &str) {
    let labels = [("format", output_format.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

/// Record a submission rejected before a job was created.
pub fn record_job_rejected(reason: &'static str) {
    counter!(names::JOBS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record a job reaching a terminal status.
pub fn record_job_finished(status: JobStatus) {
    let name = match status {
        JobStatus::Completed => names::JOBS_COMPLETED_TOTAL,
        JobStatus::Failed => names::JOBS_FAILED_TOTAL,
        JobStatus::Canceled => names::JOBS_CANCELED_TOTAL,
        JobStatus::Pending | JobStatus::Processing => return,
    };
    counter!(name).increment(1);
}

/// Track jobs currently held by a worker.
pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

/// Record FFmpeg wall time for a conversion.
pub fn record_ffmpeg_duration(output_format: &str, duration_secs: f64) {
    let labels = [("format", output_format.to_string())];
    histogram!(names::FFMPEG_DURATION_SECONDS, &labels).record(duration_secs);
}
