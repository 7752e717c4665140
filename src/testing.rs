//! Fakes shared by the processor and worker tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::config::Config;
use crate::encoder::{EncodeContext, Encoder, EncoderFactory, TranscodeKind, TranscodeRequest};
use crate::error::{Result, RunnerError};
use crate::fetch::InputFetcher;
use crate::job::{
    AudioMergeInput, AudioMergePayload, HlsPayload, Job, JobIdentity, OutputSettings, VideoInput,
    WebVideoPayload,
};
use crate::mutex::{InputFileReleaser, MutexCoordinator};
use crate::processor::JobProcessor;
use crate::report::{MockResultReporter, SuccessReport};
use crate::scratch::{ScratchDir, ScratchFile};

/// Writes `input:<url>` into a fresh scratch file, or fails for listed URLs.
pub(crate) struct FakeFetcher {
    scratch: ScratchDir,
    failing: HashSet<String>,
    pub(crate) fetched: Mutex<Vec<PathBuf>>,
}

impl FakeFetcher {
    pub(crate) fn new(scratch: ScratchDir, failing_urls: &[&str]) -> Self {
        Self {
            scratch,
            failing: failing_urls.iter().map(|u| u.to_string()).collect(),
            fetched: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl InputFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, _runner_token: &str, job: &JobIdentity) -> Result<ScratchFile> {
        if self.failing.contains(url) {
            return Err(RunnerError::Fetch(format!("Failed to download {}: HTTP 404", url)));
        }
        let file = self.scratch.input_file(&job.uuid);
        std::fs::write(file.path(), format!("input:{}", url))?;
        self.fetched.lock().unwrap().push(file.path().to_path_buf());
        Ok(file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    Succeed,
    /// Leaves a partial output behind, then fails.
    Fail,
    /// Never finishes after reading its inputs.
    Hang,
}

#[derive(Default)]
pub(crate) struct EncoderLog {
    pub(crate) calls: AtomicUsize,
    pub(crate) requests: Mutex<Vec<TranscodeKind>>,
    active: AtomicUsize,
    pub(crate) peak: AtomicUsize,
}

pub(crate) struct FakeEncoder {
    behavior: Behavior,
    delay: Duration,
    log: Arc<EncoderLog>,
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn transcode(&self, request: TranscodeRequest) -> Result<()> {
        self.log.calls.fetch_add(1, Ordering::SeqCst);
        self.log.requests.lock().unwrap().push(request.kind.clone());
        let active = self.log.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.peak.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.log.active.fetch_sub(1, Ordering::SeqCst);

        let inputs: Vec<&Path> = match &request.kind {
            TranscodeKind::Video { input_path, .. } => vec![input_path.as_path()],
            TranscodeKind::Hls { input_path, .. } => vec![input_path.as_path()],
            TranscodeKind::MergeAudio {
                audio_path,
                preview_path,
                ..
            } => vec![audio_path.as_path(), preview_path.as_path()],
        };
        for input in inputs {
            assert!(input.exists(), "input {} must be fetched before transcode", input.display());
        }
        request.releaser.release();

        let outputs = request.kind.expected_outputs();
        match self.behavior {
            Behavior::Succeed => {
                for output in outputs {
                    std::fs::write(output, b"encoded")?;
                }
                Ok(())
            }
            Behavior::Fail => {
                std::fs::write(&outputs[0], b"partial")?;
                Err(RunnerError::Encode("engine exited with status 1".to_string()))
            }
            Behavior::Hang => {
                std::fs::write(&outputs[0], b"partial")?;
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

pub(crate) struct FakeEncoderFactory {
    behavior: Behavior,
    delay: Duration,
    log: Arc<EncoderLog>,
}

impl FakeEncoderFactory {
    pub(crate) fn new(behavior: Behavior, delay: Duration, log: Arc<EncoderLog>) -> Self {
        Self { behavior, delay, log }
    }
}

impl EncoderFactory for FakeEncoderFactory {
    fn build(&self, _context: EncodeContext) -> Box<dyn Encoder> {
        Box::new(FakeEncoder {
            behavior: self.behavior,
            delay: self.delay,
            log: Arc::clone(&self.log),
        })
    }
}

/// Hands out releasers that count how often they fire.
#[derive(Default)]
pub(crate) struct CountingMutexes {
    pub(crate) acquired: AtomicUsize,
    pub(crate) released: Arc<AtomicUsize>,
}

#[async_trait]
impl MutexCoordinator for CountingMutexes {
    async fn acquire(&self, key: &str) -> InputFileReleaser {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.released);
        InputFileReleaser::from_fn(key, move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
    }
}

pub(crate) struct Harness {
    pub(crate) dir: TempDir,
    pub(crate) processor: Arc<JobProcessor>,
    pub(crate) fetcher: Arc<FakeFetcher>,
    pub(crate) encoder_log: Arc<EncoderLog>,
    pub(crate) mutexes: Arc<CountingMutexes>,
}

impl Harness {
    pub(crate) fn new(behavior: Behavior) -> Self {
        Self::build(behavior, &[], |_| {})
    }

    pub(crate) fn build(behavior: Behavior, failing_urls: &[&str], tweak: impl FnOnce(&mut Config)) -> Self {
        Self::build_with_delay(behavior, failing_urls, Duration::ZERO, tweak)
    }

    /// Like `build`, with every transcode taking at least `delay`.
    pub(crate) fn build_with_delay(
        behavior: Behavior,
        failing_urls: &[&str],
        delay: Duration,
        tweak: impl FnOnce(&mut Config),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.transcoding.directory = dir.path().to_path_buf();
        tweak(&mut config);
        let config = Arc::new(config);

        let fetcher = Arc::new(FakeFetcher::new(ScratchDir::new(&config), failing_urls));
        let encoder_log = Arc::new(EncoderLog::default());
        let mutexes = Arc::new(CountingMutexes::default());

        let processor = Arc::new(JobProcessor::new(
            config,
            fetcher.clone(),
            Arc::new(FakeEncoderFactory::new(behavior, delay, encoder_log.clone())),
            mutexes.clone(),
        ));

        Self {
            dir,
            processor,
            fetcher,
            encoder_log,
            mutexes,
        }
    }

    pub(crate) fn scratch_entries(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    pub(crate) fn releases(&self) -> usize {
        self.mutexes.released.load(Ordering::SeqCst)
    }
}

/// Reporter that checks every artifact is readable during the call and
/// keeps the submitted report.
pub(crate) fn recording_reporter(
    outcome: fn() -> Result<()>,
) -> (Arc<MockResultReporter>, Arc<Mutex<Option<SuccessReport>>>) {
    let seen = Arc::new(Mutex::new(None));
    let store = seen.clone();
    let mut reporter = MockResultReporter::new();
    reporter
        .expect_report_success()
        .times(1)
        .returning(move |report| {
            for (field, path) in report.payload.files() {
                assert!(path.exists(), "{} must be readable while reporting", field);
            }
            *store.lock().unwrap() = Some(report);
            outcome()
        });
    (Arc::new(reporter), seen)
}

pub(crate) fn never_reporter() -> Arc<MockResultReporter> {
    let mut reporter = MockResultReporter::new();
    reporter.expect_report_success().times(0);
    Arc::new(reporter)
}

pub(crate) fn web_video_job() -> Job<WebVideoPayload> {
    Job {
        job_token: "job-token".to_string(),
        uuid: "web-uuid".to_string(),
        payload: WebVideoPayload {
            input: VideoInput {
                video_file_url: "https://x/in.mp4".to_string(),
            },
            output: OutputSettings { resolution: 720, fps: 30 },
        },
    }
}

pub(crate) fn hls_job() -> Job<HlsPayload> {
    Job {
        job_token: "job-token".to_string(),
        uuid: "hls-uuid".to_string(),
        payload: HlsPayload {
            input: VideoInput {
                video_file_url: "https://x/in.mp4".to_string(),
            },
            output: OutputSettings { resolution: 480, fps: 25 },
        },
    }
}

pub(crate) fn audio_merge_job() -> Job<AudioMergePayload> {
    Job {
        job_token: "job-token".to_string(),
        uuid: "merge-uuid".to_string(),
        payload: AudioMergePayload {
            input: AudioMergeInput {
                audio_file_url: "https://x/audio.ogg".to_string(),
                preview_file_url: "https://x/preview.jpg".to_string(),
            },
            output: OutputSettings { resolution: 360, fps: 24 },
        },
    }
}
