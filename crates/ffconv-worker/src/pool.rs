//! Fixed-size worker pool over a bounded queue.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ffconv_registry::JobRegistry;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::{ConversionTask, TaskProcessor};

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<ConversionTask>>>;

/// A fixed set of worker loops consuming one bounded queue.
///
/// The queue capacity is the only backpressure: `submit` waits while it is
/// full and never drops a task.
pub struct WorkerPool {
    sender: mpsc::Sender<ConversionTask>,
    receiver: SharedReceiver,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    registry: JobRegistry,
    active: Arc<AtomicUsize>,
    workers: usize,
    capacity: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("capacity", &self.capacity)
            .field("active", &self.active_jobs())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl WorkerPool {
    /// Launch `workers` loops reading from a queue of `capacity` slots.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        workers: usize,
        capacity: usize,
        processor: Arc<dyn TaskProcessor>,
        registry: JobRegistry,
    ) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let shutdown = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));

        info!("Starting worker pool with {} workers, queue capacity {}", workers, capacity);

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    receiver.clone(),
                    shutdown.clone(),
                    processor.clone(),
                    registry.clone(),
                    active.clone(),
                ))
            })
            .collect();

        Self {
            sender,
            receiver,
            shutdown,
            handles: Mutex::new(handles),
            registry,
            active,
            workers,
            capacity,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently being processed.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Enqueue a task, waiting while the queue is full.
    pub async fn submit(&self, task: ConversionTask) -> WorkerResult<()> {
        if self.is_stopped() {
            return Err(WorkerError::PoolStopped);
        }

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(WorkerError::PoolStopped),
            sent = self.sender.send(task) => sent.map_err(|_| WorkerError::PoolStopped),
        }
    }

    /// Enqueue a task without waiting.
    pub fn try_submit(&self, task: ConversionTask) -> WorkerResult<()> {
        if self.is_stopped() {
            return Err(WorkerError::PoolStopped);
        }

        self.sender.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WorkerError::PoolStopped,
        })
    }

    /// Signal every loop to exit. Idle loops exit at once; busy loops finish
    /// their current job first.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Stopping worker pool");
            self.shutdown.cancel();
        }
    }

    /// Stop and wait for every loop to exit, bounded by `timeout`.
    ///
    /// Returns `false` if loops were still running when the timeout elapsed.
    /// Tasks still queued are marked canceled.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.stop();

        let handles = std::mem::take(&mut *self.handles.lock());
        let joined = tokio::time::timeout(timeout, async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("Worker loop ended abnormally: {}", e);
                }
            }
        })
        .await
        .is_ok();

        if !joined {
            warn!("Worker pool did not stop within {:?}", timeout);
        }

        self.drain_queued().await;
        info!("Worker pool stopped");
        joined
    }

    async fn drain_queued(&self) {
        let mut receiver = self.receiver.lock().await;
        while let Ok(task) = receiver.try_recv() {
            self.registry
                .append_log(&task.job_id, "Worker pool stopped before the job started");
            if self
                .registry
                .set_canceled(&task.job_id, "worker pool stopped")
            {
                metrics::record_job_finished(ffconv_models::JobStatus::Canceled);
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: SharedReceiver,
    shutdown: CancellationToken,
    processor: Arc<dyn TaskProcessor>,
    registry: JobRegistry,
    active: Arc<AtomicUsize>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let task = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            task = async { receiver.lock().await.recv().await } => task,
        };

        let Some(task) = task else {
            break;
        };

        let job_id = task.job_id.clone();
        active.fetch_add(1, Ordering::SeqCst);

        // Each job runs in its own task so a panic surfaces as a JoinError.
        let processor = processor.clone();
        let outcome = tokio::spawn(async move { processor.process(task).await }).await;

        active.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = outcome {
            let message = if e.is_panic() {
                format!("internal error: {}", panic_message(e.into_panic()))
            } else {
                format!("internal error: {}", e)
            };
            error!(job_id = %job_id, worker_id, "Job task aborted: {}", message);
            registry.append_log(&job_id, format!("Error: {}", message));
            if registry.set_error(&job_id, message) {
                metrics::record_job_finished(ffconv_models::JobStatus::Failed);
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
