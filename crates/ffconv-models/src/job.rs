//! Job definitions and lifecycle state.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of log lines retained per job.
pub const DEFAULT_MAX_LOG_LINES: usize = 200;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used when naming output files.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a worker
    #[default]
    Pending,
    /// Job is being transcoded
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed with an error
    Failed,
    /// Job was canceled before it could finish
    Canceled,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Whether `next` is a legal successor of this status.
    ///
    /// `processing` is only reachable from `pending`; nothing leaves a
    /// terminal state. A pending job may fail or be canceled before it is
    /// ever picked up.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing)
            | (JobStatus::Pending, JobStatus::Failed)
            | (JobStatus::Pending, JobStatus::Canceled) => true,
            (JobStatus::Processing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A conversion job and its observable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Reference to the uploaded source file
    pub file_id: String,

    /// Original display name of the source
    pub original_name: String,

    /// Requested output format (container extension)
    pub output_format: String,

    /// Current status
    pub status: JobStatus,

    /// Completion fraction in [0, 1]
    pub progress: f64,

    /// Elapsed output time reported by the transcoder
    pub out_time_ms: f64,

    /// Output file name, once the conversion completed
    #[serde(default)]
    pub output_filename: String,

    /// Error message, once the job failed or was canceled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When a worker picked the job up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Most recent log lines, oldest first
    #[serde(default)]
    pub logs: VecDeque<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        file_id: impl Into<String>,
        original_name: impl Into<String>,
        output_format: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            file_id: file_id.into(),
            original_name: original_name.into(),
            output_format: output_format.into(),
            status: JobStatus::Pending,
            progress: 0.0,
            out_time_ms: 0.0,
            output_filename: String::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            logs: VecDeque::new(),
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Name of the file the conversion writes, derived from the job ID.
    pub fn default_output_filename(&self) -> String {
        format!("{}_converted.{}", self.id.short(), self.output_format)
    }
}
