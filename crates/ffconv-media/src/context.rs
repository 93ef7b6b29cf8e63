//! Cancellation and deadline scope for a subprocess run.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::MediaError;

/// Deadline plus cancellation signal shared by the probe and convert steps of one job.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// A context with no deadline that is only cancelled explicitly.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            timeout: None,
        }
    }

    /// Bound this context by a timeout measured from now.
    ///
    /// A timeout too large to represent as an instant leaves the context
    /// without a deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self.timeout = self.deadline.map(|_| timeout);
        self
    }

    /// A narrower context: shares cancellation, and its deadline is the
    /// earlier of the parent's and `now + timeout`.
    pub fn child(&self, timeout: Duration) -> Self {
        let cancel = self.cancel.child_token();
        match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(deadline), Some(candidate)) if candidate < deadline => Self {
                cancel,
                deadline: Some(candidate),
                timeout: Some(timeout),
            },
            (None, Some(candidate)) => Self {
                cancel,
                deadline: Some(candidate),
                timeout: Some(timeout),
            },
            _ => Self {
                cancel,
                deadline: self.deadline,
                timeout: self.timeout,
            },
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Configured timeout in whole seconds, used in timeout errors.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout.map(|t| t.as_secs()).unwrap_or_default()
    }

    /// Error describing why this context is no longer live, if it isn't.
    pub fn check(&self) -> Result<(), MediaError> {
        if self.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(MediaError::Timeout(self.timeout_secs()));
            }
        }
        Ok(())
    }

    /// Resolves once the deadline passes; pending forever without one.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}
