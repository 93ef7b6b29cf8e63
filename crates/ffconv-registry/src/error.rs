//! Registry error types.

use ffconv_models::{JobId, JobStatus};
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

impl RegistryError {
    pub fn invalid_transition(id: &JobId, from: JobStatus, to: JobStatus) -> Self {
        Self::InvalidTransition {
            id: id.clone(),
            from,
            to,
        }
    }
}
