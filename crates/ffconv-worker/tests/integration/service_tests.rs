//! End-to-end conversions through the service with fake ffmpeg/ffprobe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ffconv_models::{ConversionOptions, JobStatus};
use ffconv_registry::JobEvent;
use ffconv_worker::{ConversionService, WorkerError};
use tokio_test::assert_ok;

use crate::common::{
    wait_for_status, wait_for_terminal, Sandbox, FFMPEG_FAIL, FFMPEG_HANG, FFMPEG_OK,
    FFPROBE_EMPTY, FFPROBE_FAIL, FFPROBE_OK,
};

#[tokio::test]
async fn test_end_to_end_webm_conversion() {
    let sandbox = Sandbox::new(FFMPEG_OK, FFPROBE_OK);
    let service = ConversionService::start(sandbox.config());
    let mut events = service.subscribe();

    let options = ConversionOptions::new("webm")
        .with_video_codec("libvpx-vp9")
        .with_crf(28);
    let job = assert_ok!(service.submit(options, sandbox.input(), "input.mov").await);
    assert_eq!(job.status, JobStatus::Pending);

    let mut statuses = Vec::new();
    let mut progress = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("event stream stalled")
            .expect("event stream closed");
        if event.job_id() != &job.id {
            continue;
        }
        match event {
            JobEvent::Status { job } => {
                statuses.push(job.status);
                if job.is_terminal() {
                    break;
                }
            }
            JobEvent::Progress { progress: p, .. } => progress.push(p),
            _ => {}
        }
    }

    assert_eq!(
        statuses,
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
    );
    assert_eq!(progress, vec![0.25, 0.5, 1.0]);

    let finished = service.job(&job.id).unwrap();
    assert_eq!(finished.progress, 1.0);
    assert_eq!(
        finished.output_filename,
        format!("{}_converted.webm", job.id.short())
    );
    assert!(finished.logs.len() >= 2);
    assert_eq!(finished.logs.front().map(String::as_str), Some("Starting conversion"));
    assert_eq!(
        finished.logs.back().map(String::as_str),
        Some("Conversion completed successfully")
    );
    assert!(finished
        .logs
        .iter()
        .any(|line| line == "Input: video h264 1280x720, audio aac, 4.00s"));
    assert!(finished.started_at.is_some());
    assert!(finished.completed_at.is_some());
    assert!(sandbox.output_dir().join(&finished.output_filename).exists());

    let calls = std::fs::read_to_string(sandbox.dir.path().join("ffmpeg.calls")).unwrap();
    assert!(calls.contains("-c:v libvpx-vp9 -crf 28"));
    assert!(!calls.contains("-preset"));

    service.shutdown().await;
}

#[tokio::test]
async fn test_probe_failure_still_completes_without_progress() {
    let sandbox = Sandbox::new(FFMPEG_OK, FFPROBE_FAIL);
    let service = ConversionService::start(sandbox.config());
    let mut events = service.subscribe();

    let job = assert_ok!(
        service
            .submit(ConversionOptions::new("mp4"), sandbox.input(), "input.mov")
            .await
    );

    assert_eq!(
        wait_for_terminal(service.registry(), &job.id).await,
        Some(JobStatus::Completed)
    );

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, JobEvent::Progress { .. }),
            "progress reported without a known duration"
        );
    }

    let finished = service.job(&job.id).unwrap();
    assert_eq!(finished.progress, 1.0);
    assert!(finished
        .logs
        .iter()
        .any(|line| line.contains("duration unavailable")));

    service.shutdown().await;
}

#[tokio::test]
async fn test_input_without_streams_is_logged_and_converted() {
    let sandbox = Sandbox::new(FFMPEG_OK, FFPROBE_EMPTY);
    let service = ConversionService::start(sandbox.config());

    let job = assert_ok!(
        service
            .submit(ConversionOptions::new("mp3"), sandbox.input(), "input.mov")
            .await
    );
    assert_eq!(
        wait_for_terminal(service.registry(), &job.id).await,
        Some(JobStatus::Completed)
    );

    let finished = service.job(&job.id).unwrap();
    assert!(finished
        .logs
        .iter()
        .any(|line| line == "Input: no video, no audio, duration unknown"));
    assert!(finished
        .logs
        .iter()
        .any(|line| line.contains("duration unavailable")));

    service.shutdown().await;
}

#[tokio::test]
async fn test_missing_source_fails_immediately() {
    let sandbox = Sandbox::new(FFMPEG_OK, FFPROBE_OK);
    let service = ConversionService::start(sandbox.config());

    let job = assert_ok!(
        service
            .submit(
                ConversionOptions::new("mp4"),
                sandbox.dir.path().join("missing.mov"),
                "missing.mov",
            )
            .await
    );

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress, 0.0);
    assert!(job.started_at.is_none());
    assert!(job.error.unwrap().contains("not found"));
    assert_eq!(job.logs.len(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sandbox.ffmpeg_calls(), 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_options_create_no_job() {
    let sandbox = Sandbox::new(FFMPEG_OK, FFPROBE_OK);
    let service = ConversionService::start(sandbox.config());

    let options = ConversionOptions::new("mp4").with_crf(51);
    let err = service
        .submit(options, sandbox.input(), "input.mov")
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::InvalidOptions(_)));
    assert!(service.registry().is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn test_tool_failure_records_diagnostics() {
    let sandbox = Sandbox::new(FFMPEG_FAIL, FFPROBE_OK);
    let service = ConversionService::start(sandbox.config());

    let options = ConversionOptions::new("mp4").with_video_codec("libx264");
    let job = assert_ok!(service.submit(options, sandbox.input(), "input.mov").await);

    assert_eq!(
        wait_for_terminal(service.registry(), &job.id).await,
        Some(JobStatus::Failed)
    );

    let failed = service.job(&job.id).unwrap();
    let error = failed.error.unwrap();
    assert!(error.contains("Unknown encoder"));
    assert!(!error.contains("timed out"));
    assert!(failed.logs.back().unwrap().starts_with("Error: "));
    assert!(failed.output_filename.is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn test_timeout_fails_job() {
    let sandbox = Sandbox::new(FFMPEG_HANG, FFPROBE_OK);
    let mut config = sandbox.config();
    config.job_timeout = Duration::from_millis(300);
    let service = ConversionService::start(config);

    let job = assert_ok!(
        service
            .submit(ConversionOptions::new("mp4"), sandbox.input(), "input.mov")
            .await
    );

    assert_eq!(
        wait_for_terminal(service.registry(), &job.id).await,
        Some(JobStatus::Failed)
    );
    let failed = service.job(&job.id).unwrap();
    assert!(failed.error.unwrap().contains("timed out"));

    service.shutdown().await;
}

#[tokio::test]
async fn test_cancel_processing_job_kills_process() {
    let sandbox = Sandbox::new(FFMPEG_HANG, FFPROBE_OK);
    let service = ConversionService::start(sandbox.config());

    let job = assert_ok!(
        service
            .submit(ConversionOptions::new("mp4"), sandbox.input(), "input.mov")
            .await
    );
    assert!(wait_for_status(service.registry(), &job.id, JobStatus::Processing).await);

    // Give the pipeline time to launch the subprocess.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sandbox.ffmpeg_calls() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(service.cancel(&job.id));
    assert_eq!(
        wait_for_terminal(service.registry(), &job.id).await,
        Some(JobStatus::Canceled)
    );

    let canceled = service.job(&job.id).unwrap();
    assert_eq!(canceled.error.as_deref(), Some("conversion canceled"));
    assert!(!service.cancel(&job.id));

    service.shutdown().await;
}

#[tokio::test]
async fn test_cancel_pending_job_never_launches() {
    let sandbox = Sandbox::new(FFMPEG_HANG, FFPROBE_OK);
    let service = ConversionService::start(sandbox.config());

    let running = assert_ok!(
        service
            .submit(ConversionOptions::new("mp4"), sandbox.input(), "a.mov")
            .await
    );
    assert!(wait_for_status(service.registry(), &running.id, JobStatus::Processing).await);

    let queued = assert_ok!(
        service
            .submit(ConversionOptions::new("mp4"), sandbox.input(), "b.mov")
            .await
    );
    assert!(service.cancel(&queued.id));
    assert_eq!(service.job(&queued.id).unwrap().status, JobStatus::Canceled);

    assert!(service.cancel(&running.id));
    assert_eq!(
        wait_for_terminal(service.registry(), &running.id).await,
        Some(JobStatus::Canceled)
    );

    // Let the worker dequeue the canceled job and skip it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sandbox.ffmpeg_calls(), 1);
    assert!(service.job(&queued.id).unwrap().started_at.is_none());

    service.shutdown().await;
}

#[tokio::test]
async fn test_observers_fire_once_per_transition() {
    let sandbox = Sandbox::new(FFMPEG_OK, FFPROBE_OK);
    let service = ConversionService::start(sandbox.config());

    let processing = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    {
        let processing = processing.clone();
        service.on(JobStatus::Processing, move |_| {
            processing.fetch_add(1, Ordering::SeqCst);
        });
        let completed = completed.clone();
        service.on(JobStatus::Completed, move |job| {
            assert_eq!(job.progress, 1.0);
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }

    let mut ids = Vec::new();
    for name in ["a.mov", "b.mov"] {
        let job = assert_ok!(
            service
                .submit(ConversionOptions::new("mp4"), sandbox.input(), name)
                .await
        );
        ids.push(job.id);
    }
    for id in &ids {
        assert_eq!(
            wait_for_terminal(service.registry(), id).await,
            Some(JobStatus::Completed)
        );
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(processing.load(Ordering::SeqCst), 2);
    assert_eq!(completed.load(Ordering::SeqCst), 2);

    assert_eq!(service.jobs_by_status(JobStatus::Completed).len(), 2);
    assert_eq!(service.purge_finished(chrono::Duration::hours(1)), 0);
    assert!(service.delete(&ids[0]).is_some());
    assert!(service.job(&ids[0]).is_none());

    service.shutdown().await;
}
