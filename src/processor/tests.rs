use super::*;
use crate::mutex::KeyedMutexCoordinator;
use crate::report::MockResultReporter;
use crate::testing::*;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

#[tokio::test]
async fn test_web_video_happy_path() {
    let harness = Harness::new(Behavior::Succeed);
    let (reporter, seen) = recording_reporter(|| Ok(()));

    harness
        .processor
        .process_web_video(web_video_job(), reporter, "runner-token")
        .await
        .unwrap();

    let report = seen.lock().unwrap().take().expect("reporter called");
    assert_eq!(report.job_token, "job-token");
    assert_eq!(report.job_uuid, "web-uuid");
    assert_eq!(report.runner_token, "runner-token");
    let SuccessBody::WebVideo { video_file } = &report.payload else {
        panic!("expected a web video body");
    };
    let name = video_file.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("output-") && name.ends_with(".mp4"));
    assert_eq!(video_file.parent(), Some(harness.dir.path()));

    let requests = harness.encoder_log.requests.lock().unwrap();
    let TranscodeKind::Video { input_path, output_path } = &requests[0] else {
        panic!("expected a video request");
    };
    assert_eq!(input_path, &harness.fetcher.fetched.lock().unwrap()[0]);
    assert_eq!(output_path, video_file);

    assert!(harness.scratch_entries().is_empty());
    assert_eq!(harness.releases(), 1);
}

#[tokio::test]
async fn test_hls_success_reports_two_artifacts() {
    let harness = Harness::new(Behavior::Succeed);
    let (reporter, seen) = recording_reporter(|| Ok(()));

    harness
        .processor
        .process(RunnerJob::Hls(hls_job()), reporter, "runner-token")
        .await
        .unwrap();

    let report = seen.lock().unwrap().take().expect("reporter called");
    let SuccessBody::Hls {
        resolution_playlist_file,
        video_file,
    } = &report.payload
    else {
        panic!("expected an HLS body");
    };
    assert_ne!(resolution_playlist_file, video_file);
    assert!(resolution_playlist_file.to_string_lossy().ends_with("-480.m3u8"));
    assert!(video_file.to_string_lossy().ends_with("-480-fragmented.mp4"));

    assert!(harness.scratch_entries().is_empty());
    assert_eq!(harness.releases(), 1);
}

#[tokio::test]
async fn test_hls_engine_failure_cleans_up_without_reporting() {
    let harness = Harness::new(Behavior::Fail);

    let err = harness
        .processor
        .process_hls(hls_job(), never_reporter(), "runner-token")
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Encode(_)));
    assert_eq!(harness.encoder_log.calls.load(Ordering::SeqCst), 1);
    // Input and the partial playlist are gone.
    assert!(harness.scratch_entries().is_empty());
    assert_eq!(harness.releases(), 1);
}

#[tokio::test]
async fn test_audio_merge_report_failure_still_cleans_up() {
    let harness = Harness::new(Behavior::Succeed);
    let (reporter, seen) =
        recording_reporter(|| Err(RunnerError::Report("HTTP 500 Internal Server Error".to_string())));

    let err = harness
        .processor
        .process_audio_merge(audio_merge_job(), reporter, "runner-token")
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Report(_)));
    assert!(seen.lock().unwrap().is_some());

    let fetched = harness.fetcher.fetched.lock().unwrap().clone();
    assert_eq!(fetched.len(), 2);
    assert!(fetched.iter().all(|p| !p.exists()));
    assert!(harness.scratch_entries().is_empty());
    assert_eq!(harness.releases(), 1);
}

#[tokio::test]
async fn test_audio_merge_fetches_both_inputs_before_transcode() {
    let harness = Harness::new(Behavior::Succeed);
    let (reporter, _) = recording_reporter(|| Ok(()));

    harness
        .processor
        .process_audio_merge(audio_merge_job(), reporter, "runner-token")
        .await
        .unwrap();

    let fetched = harness.fetcher.fetched.lock().unwrap().clone();
    let requests = harness.encoder_log.requests.lock().unwrap();
    let TranscodeKind::MergeAudio {
        audio_path,
        preview_path,
        ..
    } = &requests[0]
    else {
        panic!("expected a merge-audio request");
    };
    assert!(fetched.contains(audio_path));
    assert!(fetched.contains(preview_path));
    assert_ne!(audio_path, preview_path);
    assert_eq!(std::fs::read_dir(harness.dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_audio_merge_partial_fetch_failure() {
    let harness = Harness::build(Behavior::Succeed, &["https://x/preview.jpg"], |_| {});

    let err = harness
        .processor
        .process_audio_merge(audio_merge_job(), never_reporter(), "runner-token")
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Fetch(_)));
    assert_eq!(harness.encoder_log.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.mutexes.acquired.load(Ordering::SeqCst), 0);
    // The audio input that did arrive is removed as well.
    assert!(harness.scratch_entries().is_empty());
}

#[tokio::test]
async fn test_fetch_failure_never_transcodes() {
    let harness = Harness::build(Behavior::Succeed, &["https://x/in.mp4"], |_| {});

    let err = harness
        .processor
        .process_web_video(web_video_job(), never_reporter(), "runner-token")
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Fetch(_)));
    assert_eq!(harness.encoder_log.calls.load(Ordering::SeqCst), 0);
    assert!(harness.scratch_entries().is_empty());
}

#[tokio::test]
async fn test_transcode_timeout_is_encode_error() {
    let harness = Harness::build(Behavior::Hang, &[], |config| {
        config.worker.transcode_timeout_secs = 1;
    });

    let err = harness
        .processor
        .process_web_video(web_video_job(), never_reporter(), "runner-token")
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Encode(_)));
    assert!(err.to_string().contains("timed out"));
    assert!(harness.scratch_entries().is_empty());
    assert_eq!(harness.releases(), 1);
}

#[tokio::test]
async fn test_cancellation_runs_cleanup() {
    let harness = Harness::new(Behavior::Hang);
    let cancel = harness.processor.cancellation_token().clone();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let err = harness
        .processor
        .process_hls(hls_job(), never_reporter(), "runner-token")
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, RunnerError::Cancelled));
    assert!(harness.scratch_entries().is_empty());
    assert_eq!(harness.releases(), 1);
}

#[tokio::test]
async fn test_concurrent_jobs_use_distinct_files() {
    let harness = Harness::new(Behavior::Succeed);
    let mut reporter = MockResultReporter::new();
    let outputs = Arc::new(Mutex::new(Vec::new()));
    let store = outputs.clone();
    reporter.expect_report_success().times(2).returning(move |report| {
        for (_, path) in report.payload.files() {
            store.lock().unwrap().push(path.to_path_buf());
        }
        Ok(())
    });
    let reporter: Arc<dyn ResultReporter> = Arc::new(reporter);

    let mut second = web_video_job();
    second.uuid = "web-uuid-2".to_string();

    let (a, b) = tokio::join!(
        harness
            .processor
            .process_web_video(web_video_job(), reporter.clone(), "runner-token"),
        harness
            .processor
            .process_web_video(second, reporter.clone(), "runner-token"),
    );
    a.unwrap();
    b.unwrap();

    let outputs = outputs.lock().unwrap();
    assert_eq!(outputs.len(), 2);
    assert_ne!(outputs[0], outputs[1]);
    assert!(harness.scratch_entries().is_empty());
    assert_eq!(harness.releases(), 2);
}

#[tokio::test]
async fn test_same_source_jobs_encode_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.transcoding.directory = dir.path().to_path_buf();
    config.worker.transcode_timeout_secs = 1;
    let config = Arc::new(config);

    let encoder_log = Arc::new(EncoderLog::default());
    let processor = JobProcessor::new(
        config.clone(),
        Arc::new(FakeFetcher::new(ScratchDir::new(&config), &[])),
        Arc::new(FakeEncoderFactory::new(
            Behavior::Succeed,
            Duration::from_millis(700),
            encoder_log.clone(),
        )),
        Arc::new(KeyedMutexCoordinator::new()),
    );

    let mut reporter = MockResultReporter::new();
    reporter.expect_report_success().times(2).returning(|_| Ok(()));
    let reporter: Arc<dyn ResultReporter> = Arc::new(reporter);

    // Two renditions of the same source.
    let low = hls_job();
    let mut high = hls_job();
    high.uuid = "hls-uuid-720".to_string();
    high.payload.output.resolution = 720;

    let (a, b) = tokio::join!(
        processor.process_hls(low, reporter.clone(), "runner-token"),
        processor.process_hls(high, reporter.clone(), "runner-token"),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(encoder_log.peak.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
