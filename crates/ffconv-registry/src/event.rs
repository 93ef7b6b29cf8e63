//! Job events broadcast to subscribers.

use ffconv_models::{Job, JobId, JobStatus};
use serde::Serialize;

/// Notification emitted after a registry mutation commits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job entered a new status. Carries the snapshot taken at that moment.
    Status { job: Job },
    /// Progress advanced.
    Progress {
        job_id: JobId,
        progress: f64,
        out_time_ms: f64,
    },
    /// A log line was appended.
    Log { job_id: JobId, line: String },
    /// A job was removed from the registry.
    Deleted { job_id: JobId },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Status { job } => &job.id,
            JobEvent::Progress { job_id, .. }
            | JobEvent::Log { job_id, .. }
            | JobEvent::Deleted { job_id } => job_id,
        }
    }

    /// Status carried by a status event.
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            JobEvent::Status { job } => Some(job.status),
            _ => None,
        }
    }

    /// Whether this event closes the job's stream.
    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(|s| s.is_terminal())
    }
}
