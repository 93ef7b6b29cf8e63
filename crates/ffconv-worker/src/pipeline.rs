//! Conversion pipeline: probe, build, run, record.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ffconv_media::{probe_media_info, FfmpegCommand, FfmpegRunner, MediaError, RunContext};
use ffconv_models::{ConversionOptions, JobId, JobStatus};
use ffconv_registry::JobRegistry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, Instrument};

use crate::config::WorkerConfig;
use crate::logging::JobLogger;
use crate::metrics;

/// One unit of work handed to the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionTask {
    pub job_id: JobId,
    pub options: ConversionOptions,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

impl ConversionTask {
    /// Name of the output file, without its directory.
    pub fn output_filename(&self) -> String {
        self.output_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Something the pool can hand dequeued tasks to.
#[async_trait]
pub trait TaskProcessor: Send + Sync + 'static {
    /// Drive a task to a terminal job state. Failures are recorded in the
    /// registry, not returned.
    async fn process(&self, task: ConversionTask);
}

/// Runs one conversion against the registry.
#[derive(Debug, Clone)]
pub struct ConversionPipeline {
    registry: JobRegistry,
    runner: FfmpegRunner,
    ffprobe_path: PathBuf,
    job_timeout: Duration,
    probe_timeout: Duration,
    in_flight: Arc<Mutex<HashMap<JobId, RunContext>>>,
}

/// Removes a job's run context from the in-flight map when dropped,
/// including during unwinding.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<JobId, RunContext>>,
    job_id: JobId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        in_flight.remove(&self.job_id);
        metrics::set_jobs_in_flight(in_flight.len());
    }
}

impl ConversionPipeline {
    pub fn new(registry: JobRegistry, config: &WorkerConfig) -> Self {
        Self {
            registry,
            runner: FfmpegRunner::new(&config.ffmpeg_path),
            ffprobe_path: config.ffprobe_path.clone(),
            job_timeout: config.job_timeout,
            probe_timeout: config.probe_timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Signal the run context of an in-flight job. Returns whether one was found.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.in_flight.lock().get(job_id) {
            Some(ctx) => {
                ctx.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight job.
    pub fn cancel_all(&self) -> usize {
        let in_flight = self.in_flight.lock();
        for ctx in in_flight.values() {
            ctx.cancel();
        }
        in_flight.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Process one dequeued task.
    pub async fn run(&self, task: ConversionTask) {
        let logger = JobLogger::new(&task.job_id, task.options.normalized_format());
        let span = logger.span();
        self.run_inner(task, logger).instrument(span).await
    }

    async fn run_inner(&self, task: ConversionTask, logger: JobLogger) {
        let job_id = task.job_id.clone();

        // Registered before the job turns processing so a concurrent cancel
        // always finds either a pending job or a live context.
        let ctx = RunContext::new().with_timeout(self.job_timeout);
        let _in_flight = self.register(&job_id, ctx.clone());

        if !self.registry.set_status(&job_id, JobStatus::Processing) {
            debug!(job_id = %job_id, "Job no longer pending, skipping");
            return;
        }

        logger.started(&task.output_filename());
        self.registry.append_log(&job_id, "Starting conversion");

        if let Some(status) = self.convert(&task, &ctx, &logger).await {
            metrics::record_job_finished(status);
        }
    }

    /// Returns the terminal status this run wrote, or `None` when the job was
    /// already finished by someone else.
    async fn convert(
        &self,
        task: &ConversionTask,
        ctx: &RunContext,
        logger: &JobLogger,
    ) -> Option<JobStatus> {
        let job_id = &task.job_id;

        if ctx.is_cancelled() {
            return self.finish_with_error(job_id, MediaError::Cancelled, logger);
        }

        let probe_ctx = ctx.child(self.probe_timeout);
        let duration = match probe_media_info(&self.ffprobe_path, &probe_ctx, &task.input_path).await {
            Ok(info) => {
                logger.probed(&info);
                self.registry.append_log(job_id, format!("Input: {}", info));
                info.duration
                    .ok_or_else(|| MediaError::InvalidDuration("not reported".to_string()))
            }
            Err(_) if ctx.is_cancelled() => {
                return self.finish_with_error(job_id, MediaError::Cancelled, logger);
            }
            Err(e) => Err(e),
        };
        let total_duration = match duration {
            Ok(duration) => Some(duration),
            Err(e) => {
                logger.probe_failed(&e);
                self.registry.append_log(
                    job_id,
                    format!("Warning: duration unavailable, progress will not be reported ({})", e),
                );
                None
            }
        };

        let cmd = FfmpegCommand::from_options(&task.options, &task.input_path, &task.output_path);
        debug!(job_id = %job_id, args = ?cmd.build_args(), "FFmpeg command built");

        if let Some(parent) = task.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return self.finish_with_error(job_id, MediaError::Io(e), logger);
            }
        }

        let registry = self.registry.clone();
        let sink_job_id = job_id.clone();
        let sink = move |event: ffconv_media::ProgressEvent| {
            registry.set_progress(&sink_job_id, event.current, event.out_time_ms);
        };

        let started = Instant::now();
        let result = self.runner.run(ctx, &cmd, total_duration, sink).await;
        metrics::record_ffmpeg_duration(&task.options.normalized_format(), started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                let output_filename = task.output_filename();
                self.registry
                    .append_log(job_id, "Conversion completed successfully");
                if self.registry.set_completed(job_id, output_filename.clone()) {
                    logger.completed(&output_filename);
                    Some(JobStatus::Completed)
                } else {
                    // Canceled while the process was exiting.
                    None
                }
            }
            Err(e) => self.finish_with_error(job_id, e, logger),
        }
    }

    /// Log a line for the failure, then write the terminal state.
    fn finish_with_error(
        &self,
        job_id: &JobId,
        err: MediaError,
        logger: &JobLogger,
    ) -> Option<JobStatus> {
        match err {
            MediaError::Cancelled => {
                logger.canceled();
                self.registry.append_log(job_id, "Conversion canceled");
                self.registry
                    .set_canceled(job_id, "conversion canceled")
                    .then_some(JobStatus::Canceled)
            }
            MediaError::Timeout(secs) => {
                let message = format!("conversion timed out after {}s", secs);
                logger.failed(&message);
                self.registry.append_log(job_id, format!("Error: {}", message));
                self.registry
                    .set_error(job_id, message)
                    .then_some(JobStatus::Failed)
            }
            other => {
                let message = other.to_string();
                logger.failed(&message);
                self.registry.append_log(job_id, format!("Error: {}", message));
                self.registry
                    .set_error(job_id, message)
                    .then_some(JobStatus::Failed)
            }
        }
    }

    fn register(&self, job_id: &JobId, ctx: RunContext) -> InFlightGuard<'_> {
        let mut in_flight = self.in_flight.lock();
        in_flight.insert(job_id.clone(), ctx);
        metrics::set_jobs_in_flight(in_flight.len());
        InFlightGuard {
            in_flight: &self.in_flight,
            job_id: job_id.clone(),
        }
    }
}

#[async_trait]
impl TaskProcessor for ConversionPipeline {
    async fn process(&self, task: ConversionTask) {
        self.run(task).await
    }
}
