//! Worker pool behavior with stub processors.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ffconv_models::{ConversionOptions, JobStatus};
use ffconv_registry::JobRegistry;
use ffconv_worker::{ConversionTask, TaskProcessor, WorkerError, WorkerPool};
use tokio::sync::Semaphore;
use tokio_test::{assert_err, assert_ok};

use crate::common::{wait_for_status, wait_for_terminal};

/// Completes each job once a gate permit is available.
struct GatedProcessor {
    registry: JobRegistry,
    gate: Arc<Semaphore>,
    processed: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskProcessor for GatedProcessor {
    async fn process(&self, task: ConversionTask) {
        if !self.registry.set_status(&task.job_id, JobStatus::Processing) {
            return;
        }
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.registry
            .set_completed(&task.job_id, task.output_filename());
    }
}

/// Panics on any job whose source is named "boom".
struct PanickyProcessor {
    registry: JobRegistry,
}

#[async_trait]
impl TaskProcessor for PanickyProcessor {
    async fn process(&self, task: ConversionTask) {
        self.registry.set_status(&task.job_id, JobStatus::Processing);
        if task.input_path.ends_with("boom") {
            panic!("decoder exploded");
        }
        self.registry
            .set_completed(&task.job_id, task.output_filename());
    }
}

fn task_for(registry: &JobRegistry, name: &str) -> ConversionTask {
    let job = registry.create(name, name, "mp4");
    ConversionTask {
        job_id: job.id,
        options: ConversionOptions::new("mp4"),
        input_path: PathBuf::from(name),
        output_path: PathBuf::from(format!("/tmp/{}_converted.mp4", name)),
    }
}

fn gated_pool(registry: &JobRegistry, workers: usize, capacity: usize) -> (WorkerPool, Arc<Semaphore>, Arc<AtomicUsize>) {
    let gate = Arc::new(Semaphore::new(0));
    let processed = Arc::new(AtomicUsize::new(0));
    let processor = GatedProcessor {
        registry: registry.clone(),
        gate: gate.clone(),
        processed: processed.clone(),
    };
    let pool = WorkerPool::start(workers, capacity, Arc::new(processor), registry.clone());
    (pool, gate, processed)
}

#[tokio::test]
async fn test_submit_blocks_when_queue_is_full() {
    let registry = JobRegistry::default();
    let (pool, gate, processed) = gated_pool(&registry, 1, 1);
    let pool = Arc::new(pool);

    let first = task_for(&registry, "first");
    let first_id = first.job_id.clone();
    assert_ok!(pool.submit(first).await);
    assert!(wait_for_status(&registry, &first_id, JobStatus::Processing).await);

    // One slot in the queue.
    assert_ok!(pool.submit(task_for(&registry, "second")).await);

    // Worker busy and queue full: the next submit must wait.
    let blocked = tokio::time::timeout(
        Duration::from_millis(150),
        pool.submit(task_for(&registry, "third")),
    )
    .await;
    assert!(blocked.is_err(), "submit returned while the queue was full");

    let err = assert_err!(pool.try_submit(task_for(&registry, "fourth")));
    assert!(matches!(err, WorkerError::QueueFull));

    let waiting = task_for(&registry, "fifth");
    let waiting_id = waiting.job_id.clone();
    let submitter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.submit(waiting).await })
    };

    gate.add_permits(10);
    assert_ok!(submitter.await.unwrap());

    assert_eq!(
        wait_for_terminal(&registry, &waiting_id).await,
        Some(JobStatus::Completed)
    );
    assert_eq!(processed.load(Ordering::SeqCst), 3);

    // The timed-out and rejected submissions were never enqueued.
    assert_eq!(registry.list_by_status(JobStatus::Pending).len(), 2);
    assert!(pool.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_panic_is_contained_to_one_job() {
    let registry = JobRegistry::default();
    let processor = PanickyProcessor {
        registry: registry.clone(),
    };
    let pool = WorkerPool::start(1, 4, Arc::new(processor), registry.clone());

    let boom = task_for(&registry, "boom");
    let fine = task_for(&registry, "fine");
    let (boom_id, fine_id) = (boom.job_id.clone(), fine.job_id.clone());

    assert_ok!(pool.submit(boom).await);
    assert_ok!(pool.submit(fine).await);

    assert_eq!(wait_for_terminal(&registry, &boom_id).await, Some(JobStatus::Failed));
    assert_eq!(wait_for_terminal(&registry, &fine_id).await, Some(JobStatus::Completed));

    let failed = registry.get(&boom_id).unwrap();
    let error = failed.error.unwrap();
    assert!(error.starts_with("internal error"));
    assert!(error.contains("decoder exploded"));
    assert!(failed.logs.iter().any(|line| line.starts_with("Error: internal error")));

    assert!(pool.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_and_cancels_queued() {
    let registry = JobRegistry::default();
    let (pool, gate, processed) = gated_pool(&registry, 1, 2);
    let pool = Arc::new(pool);

    let running = task_for(&registry, "running");
    let queued = task_for(&registry, "queued");
    let (running_id, queued_id) = (running.job_id.clone(), queued.job_id.clone());

    assert_ok!(pool.submit(running).await);
    assert!(wait_for_status(&registry, &running_id, JobStatus::Processing).await);
    assert_ok!(pool.submit(queued).await);

    let shutdown = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.shutdown(Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pool.is_stopped());

    gate.add_permits(10);
    assert!(shutdown.await.unwrap());

    assert_eq!(processed.load(Ordering::SeqCst), 1);
    assert_eq!(registry.get(&running_id).unwrap().status, JobStatus::Completed);
    assert_eq!(registry.get(&queued_id).unwrap().status, JobStatus::Canceled);

    let err = assert_err!(pool.submit(task_for(&registry, "late")).await);
    assert!(matches!(err, WorkerError::PoolStopped));
    let err = assert_err!(pool.try_submit(task_for(&registry, "later")));
    assert!(matches!(err, WorkerError::PoolStopped));
}

#[tokio::test]
async fn test_workers_run_concurrently() {
    let registry = JobRegistry::default();
    let (pool, gate, processed) = gated_pool(&registry, 3, 6);

    let ids: Vec<_> = (0..3)
        .map(|i| task_for(&registry, &format!("job{}", i)))
        .collect();
    for task in ids.iter().cloned() {
        assert_ok!(pool.submit(task).await);
    }

    for task in &ids {
        assert!(wait_for_status(&registry, &task.job_id, JobStatus::Processing).await);
    }
    assert_eq!(pool.active_jobs(), 3);

    gate.add_permits(3);
    for task in &ids {
        assert_eq!(
            wait_for_terminal(&registry, &task.job_id).await,
            Some(JobStatus::Completed)
        );
    }
    assert_eq!(processed.load(Ordering::SeqCst), 3);
    assert!(pool.shutdown(Duration::from_secs(5)).await);
}
