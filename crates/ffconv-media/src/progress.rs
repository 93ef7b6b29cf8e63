//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Normalized progress for one job.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Completion fraction in [0, 1]
    pub current: f64,
    /// Always 1.0
    pub total: f64,
    /// Raw `out_time_ms` marker reported by ffmpeg
    pub out_time_ms: f64,
}

/// Decodes `-progress pipe:1` output into [`ProgressEvent`]s.
///
/// Only `out_time_ms` is recognized. ffmpeg actually reports that key in
/// microseconds; the value is treated as milliseconds here, so a fraction
/// reaches 1.0 well before the encode is done and stays clamped there.
#[derive(Debug, Clone, Copy)]
pub struct ProgressDecoder {
    total_seconds: Option<f64>,
}

impl ProgressDecoder {
    pub fn new(total_seconds: Option<f64>) -> Self {
        Self {
            total_seconds: total_seconds.filter(|d| d.is_finite() && *d > 0.0),
        }
    }

    /// Whether a usable total duration is known.
    pub fn has_total(&self) -> bool {
        self.total_seconds.is_some()
    }

    /// Extract the elapsed marker from a line, if it carries one.
    pub fn out_time_ms(line: &str) -> Option<f64> {
        let (key, value) = line.trim().split_once('=')?;
        if key.trim() != "out_time_ms" {
            return None;
        }
        value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }

    /// Decode one line. Returns `None` for unrecognized lines and when no
    /// total duration is known.
    pub fn decode(&self, line: &str) -> Option<ProgressEvent> {
        let out_time_ms = Self::out_time_ms(line)?;
        let total = self.total_seconds?;
        let current = ((out_time_ms / 1000.0) / total).clamp(0.0, 1.0);
        Some(ProgressEvent {
            current,
            total: 1.0,
            out_time_ms,
        })
    }
}
