//! In-memory job registry.
//!
//! All job state lives behind one `RwLock`. Each operation takes the lock
//! once and sends its event while still holding it, so subscribers see a
//! job's events in the order its changes were committed. Status observers
//! run after the lock is released and may call back into the registry.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ffconv_models::{Job, JobId, JobStatus, DEFAULT_MAX_LOG_LINES};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::event::JobEvent;

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Observer invoked with a snapshot of a job that entered a status.
pub type StatusHandler = Arc<dyn Fn(Job) + Send + Sync + 'static>;

struct Inner {
    jobs: RwLock<HashMap<JobId, Job>>,
    handlers: RwLock<HashMap<JobStatus, Vec<StatusHandler>>>,
    event_tx: broadcast::Sender<JobEvent>,
    max_log_lines: usize,
}

/// Single source of truth for job state. Cheap to clone.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.inner.jobs.read().len())
            .field("max_log_lines", &self.inner.max_log_lines)
            .finish()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_LINES)
    }
}

impl JobRegistry {
    /// Create a registry keeping at most `max_log_lines` log lines per job.
    pub fn new(max_log_lines: usize) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                handlers: RwLock::new(HashMap::new()),
                event_tx,
                max_log_lines: max_log_lines.max(1),
            }),
        }
    }

    pub fn max_log_lines(&self) -> usize {
        self.inner.max_log_lines
    }

    /// Create a new pending job.
    pub fn create(
        &self,
        file_id: impl Into<String>,
        original_name: impl Into<String>,
        output_format: impl Into<String>,
    ) -> Job {
        let job = Job::new(file_id, original_name, output_format);
        {
            let mut jobs = self.inner.jobs.write();
            jobs.insert(job.id.clone(), job.clone());
            self.broadcast(JobEvent::Status { job: job.clone() });
        }

        debug!(job_id = %job.id, "Job created");
        self.notify_observers(job.clone());
        job
    }

    /// Snapshot of a job.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.inner.jobs.read().get(id).cloned()
    }

    /// Snapshot of a job, or an error if it is unknown.
    pub fn require(&self, id: &JobId) -> RegistryResult<Job> {
        self.get(id).ok_or_else(|| RegistryError::JobNotFound(id.clone()))
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.inner.jobs.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a status transition, reporting why it was refused.
    pub fn transition(&self, id: &JobId, status: JobStatus) -> RegistryResult<Job> {
        self.mutate_status(id, status, |_| {})
    }

    /// Apply a status transition. Unknown ids and illegal transitions are
    /// no-ops returning `false`.
    pub fn set_status(&self, id: &JobId, status: JobStatus) -> bool {
        self.transition(id, status).is_ok()
    }

    /// Record progress for a processing job.
    ///
    /// The fraction is clamped to [0, 1] and never moves backwards.
    pub fn set_progress(&self, id: &JobId, fraction: f64, out_time_ms: f64) -> bool {
        let mut jobs = self.inner.jobs.write();
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        if job.status != JobStatus::Processing {
            return false;
        }
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        job.progress = job.progress.max(fraction);
        if out_time_ms.is_finite() {
            job.out_time_ms = job.out_time_ms.max(out_time_ms);
        }

        self.broadcast(JobEvent::Progress {
            job_id: id.clone(),
            progress: job.progress,
            out_time_ms: job.out_time_ms,
        });
        true
    }

    /// Mark a job failed with an error message.
    pub fn set_error(&self, id: &JobId, message: impl Into<String>) -> bool {
        let message = message.into();
        self.mutate_status(id, JobStatus::Failed, |job| {
            job.error = Some(message);
        })
        .is_ok()
    }

    /// Mark a processing job completed with its output file name.
    pub fn set_completed(&self, id: &JobId, output_filename: impl Into<String>) -> bool {
        let output_filename = output_filename.into();
        self.mutate_status(id, JobStatus::Completed, |job| {
            job.output_filename = output_filename;
        })
        .is_ok()
    }

    /// Mark a job canceled.
    pub fn set_canceled(&self, id: &JobId, message: impl Into<String>) -> bool {
        let message = message.into();
        self.mutate_status(id, JobStatus::Canceled, |job| {
            job.error = Some(message);
        })
        .is_ok()
    }

    /// Append a line to a job's log ring, evicting the oldest line when full.
    /// Accepted in any state.
    pub fn append_log(&self, id: &JobId, line: impl Into<String>) -> bool {
        let line = line.into();
        debug!(job_id = %id, "{}", line);

        let mut jobs = self.inner.jobs.write();
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        while job.logs.len() >= self.inner.max_log_lines {
            job.logs.pop_front();
        }
        job.logs.push_back(line.clone());

        self.broadcast(JobEvent::Log {
            job_id: id.clone(),
            line,
        });
        true
    }

    /// Remove a job.
    pub fn delete(&self, id: &JobId) -> Option<Job> {
        let mut jobs = self.inner.jobs.write();
        let removed = jobs.remove(id);
        if removed.is_some() {
            debug!(job_id = %id, "Job deleted");
            self.broadcast(JobEvent::Deleted { job_id: id.clone() });
        }
        removed
    }

    /// Jobs currently in `status`, oldest first.
    pub fn list_by_status(&self, status: JobStatus) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .jobs
            .read()
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Every job, oldest first.
    pub fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.jobs.read().values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Drop terminal jobs that finished before `cutoff`. Returns how many were removed.
    pub fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.inner.jobs.write();
        let stale: Vec<JobId> = jobs
            .values()
            .filter(|job| job.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
            .map(|job| job.id.clone())
            .collect();
        for id in &stale {
            jobs.remove(id);
            self.broadcast(JobEvent::Deleted { job_id: id.clone() });
        }
        stale.len()
    }

    /// Register an observer for jobs entering `status`. Observers run in
    /// registration order.
    pub fn on<F>(&self, status: JobStatus, handler: F)
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .write()
            .entry(status)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.event_tx.subscribe()
    }

    fn mutate_status<F>(&self, id: &JobId, status: JobStatus, apply: F) -> RegistryResult<Job>
    where
        F: FnOnce(&mut Job),
    {
        let snapshot = {
            let mut jobs = self.inner.jobs.write();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| RegistryError::JobNotFound(id.clone()))?;

            if !job.status.can_transition_to(status) {
                return Err(RegistryError::invalid_transition(id, job.status, status));
            }

            let now = Utc::now();
            if status == JobStatus::Processing {
                job.started_at = Some(now);
            }
            if status.is_terminal() {
                job.completed_at = Some(now);
            }
            if status == JobStatus::Completed {
                job.progress = 1.0;
            }
            job.status = status;
            apply(job);

            let snapshot = job.clone();
            self.broadcast(JobEvent::Status {
                job: snapshot.clone(),
            });
            snapshot
        };

        debug!(job_id = %id, status = %status, "Job status changed");
        self.notify_observers(snapshot.clone());
        Ok(snapshot)
    }

    fn broadcast(&self, event: JobEvent) {
        if self.inner.event_tx.send(event).is_err() {
            tracing::trace!("No subscribers for job event");
        }
    }

    /// Run the observers for the status `job` just entered. Must be called
    /// without the jobs lock held.
    fn notify_observers(&self, job: Job) {
        let handlers: Vec<StatusHandler> = self
            .inner
            .handlers
            .read()
            .get(&job.status)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    for handler in handlers {
                        let job = job.clone();
                        // Later observers still run if this one panics.
                        if catch_unwind(AssertUnwindSafe(|| handler(job))).is_err() {
                            warn!("Job status observer panicked");
                        }
                    }
                });
            }
            Err(_) => {
                for handler in handlers {
                    if catch_unwind(AssertUnwindSafe(|| handler(job.clone()))).is_err() {
                        warn!(job_id = %job.id, "Job status observer panicked");
                    }
                }
            }
        }
    }
}
