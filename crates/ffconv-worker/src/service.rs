//! Caller-facing conversion service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use ffconv_models::{ConversionOptions, Job, JobId, JobStatus};
use ffconv_registry::{JobEvent, JobRegistry};
use tokio::sync::broadcast;
use tracing::{info, warn};
use validator::Validate;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::{ConversionPipeline, ConversionTask};
use crate::pool::WorkerPool;

/// Entry point: validates submissions, creates jobs and dispatches them.
#[derive(Debug)]
pub struct ConversionService {
    config: WorkerConfig,
    registry: JobRegistry,
    pipeline: ConversionPipeline,
    pool: WorkerPool,
}

impl ConversionService {
    /// Build the registry and pipeline and start the pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: WorkerConfig) -> Self {
        let registry = JobRegistry::new(config.max_log_lines);
        let pipeline = ConversionPipeline::new(registry.clone(), &config);
        let pool = WorkerPool::start(
            config.workers,
            config.queue_capacity,
            Arc::new(pipeline.clone()),
            registry.clone(),
        );

        info!(
            "Conversion service started (workers={}, preset_mode={})",
            config.workers, config.preset_mode
        );

        Self {
            config,
            registry,
            pipeline,
            pool,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Submit a conversion.
    ///
    /// Invalid options are rejected without creating a job. A missing input
    /// yields a job that is already `failed`. Otherwise the returned snapshot
    /// is `pending`; waits while the queue is full.
    pub async fn submit(
        &self,
        mut options: ConversionOptions,
        input_path: impl AsRef<Path>,
        original_name: impl Into<String>,
    ) -> WorkerResult<Job> {
        if let Err(e) = options.validate() {
            metrics::record_job_rejected("invalid_options");
            return Err(WorkerError::InvalidOptions(e));
        }

        options.output_format = options.normalized_format();
        if options.preset_mode.is_none() {
            options.preset_mode = Some(self.config.preset_mode);
        }

        let input_path = input_path.as_ref().to_path_buf();
        let file_id = input_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        let job = self
            .registry
            .create(file_id, original_name, options.output_format.clone());
        metrics::record_job_submitted(&job.output_format);

        if !tokio::fs::try_exists(&input_path).await.unwrap_or(false) {
            let message = WorkerError::SourceNotFound(input_path.clone()).to_string();
            warn!(job_id = %job.id, "{}", message);
            self.registry.append_log(&job.id, format!("Error: {}", message));
            self.registry.set_error(&job.id, message);
            metrics::record_job_finished(JobStatus::Failed);
            return self.registry.require(&job.id).map_err(Into::into);
        }

        let task = ConversionTask {
            job_id: job.id.clone(),
            output_path: self.output_path_for(&job),
            options,
            input_path,
        };

        if let Err(e) = self.pool.submit(task).await {
            warn!(job_id = %job.id, "Dispatch failed: {}", e);
            self.registry.append_log(&job.id, format!("Error: {}", e));
            self.registry.set_error(&job.id, e.to_string());
            metrics::record_job_finished(JobStatus::Failed);
            return Err(e);
        }

        Ok(job)
    }

    /// Where a job's output is written.
    pub fn output_path_for(&self, job: &Job) -> PathBuf {
        self.config.output_dir.join(job.default_output_filename())
    }

    pub fn job(&self, id: &JobId) -> Option<Job> {
        self.registry.get(id)
    }

    pub fn jobs_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.registry.list_by_status(status)
    }

    pub fn delete(&self, id: &JobId) -> Option<Job> {
        self.registry.delete(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.registry.subscribe()
    }

    /// Register an observer for jobs entering `status`.
    pub fn on<F>(&self, status: JobStatus, handler: F)
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        self.registry.on(status, handler);
    }

    /// Remove terminal jobs that finished more than `max_age` ago.
    pub fn purge_finished(&self, max_age: chrono::Duration) -> usize {
        let removed = self.registry.remove_finished_before(Utc::now() - max_age);
        if removed > 0 {
            info!("Purged {} finished jobs", removed);
        }
        removed
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Cancel a job.
    ///
    /// A pending job is canceled directly and never launched. A processing
    /// job has its subprocess killed and ends `canceled`. Returns `false` for
    /// unknown or already terminal jobs.
    pub fn cancel(&self, id: &JobId) -> bool {
        match self.registry.get(id) {
            Some(job) => self.cancel_job(&job),
            None => false,
        }
    }

    /// Cancel from a snapshot that may already be stale.
    ///
    /// The run context is signalled after the terminal write: a worker that
    /// picked the job up in between either fails its `processing` transition
    /// or has its context registered by now.
    fn cancel_job(&self, job: &Job) -> bool {
        if job.is_terminal() {
            return false;
        }

        let mut canceled = false;
        if job.status == JobStatus::Pending {
            self.registry
                .append_log(&job.id, "Conversion canceled before it started");
            canceled = self.registry.set_canceled(&job.id, "conversion canceled");
            if canceled {
                metrics::record_job_finished(JobStatus::Canceled);
            }
        }

        let signalled = self.pipeline.cancel(&job.id);
        canceled || signalled
    }

    /// Stop the pool and wait for the worker loops to exit.
    ///
    /// Jobs still running when the shutdown timeout elapses are cancelled.
    pub async fn shutdown(&self) {
        if !self.pool.shutdown(self.config.shutdown_timeout).await {
            let cancelled = self.pipeline.cancel_all();
            warn!("Cancelled {} in-flight jobs after shutdown timeout", cancelled);
        }
    }
}
