//! Worker error types.

use std::path::PathBuf;

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid conversion options: {0}")]
    InvalidOptions(#[from] validator::ValidationErrors),

    #[error("Input file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Worker pool is stopped")]
    PoolStopped,

    #[error("Worker queue is full")]
    QueueFull,

    #[error("Registry error: {0}")]
    Registry(#[from] ffconv_registry::RegistryError),
}

impl WorkerError {
    /// Rejected before any job state or subprocess exists.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            WorkerError::InvalidOptions(_) | WorkerError::SourceNotFound(_)
        )
    }

    /// Whether the caller may try the same submission again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::QueueFull)
    }
}
