//! Job processors: fetch → transcode → report → cleanup, one entry point per
//! job kind.
//!
//! Every scratch file a run creates is owned by that run and removed before
//! `process_*` returns, whatever the outcome. Artifacts are only removed
//! after the coordinator call that transmits them has returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, WorkerConfig};
use crate::encoder::{EncodeContext, EncoderFactory, TranscodeKind, TranscodeRequest};
use crate::error::{Result, RunnerError};
use crate::fetch::InputFetcher;
use crate::job::{
    AudioMergePayload, HlsPayload, Job, JobIdentity, OutputSettings, RunnerJob, SuccessBody,
    WebVideoPayload,
};
use crate::mutex::MutexCoordinator;
use crate::report::{ResultReporter, SuccessReport};
use crate::scratch::{cleanup, ScratchDir, ScratchFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fetch,
    Transcode,
    Report,
}

impl Stage {
    fn limit(&self, worker: &WorkerConfig) -> Duration {
        match self {
            Stage::Fetch => worker.fetch_timeout(),
            Stage::Transcode => worker.transcode_timeout(),
            Stage::Report => worker.report_timeout(),
        }
    }

    fn timed_out(&self, limit: Duration) -> RunnerError {
        match self {
            Stage::Fetch => RunnerError::Fetch(format!("Input download timed out after {:?}", limit)),
            Stage::Transcode => RunnerError::Encode(format!("Transcoding timed out after {:?}", limit)),
            Stage::Report => RunnerError::Report(format!("Result submission timed out after {:?}", limit)),
        }
    }
}

/// What a run has prepared once its inputs are on disk.
struct PreparedRun {
    job: JobIdentity,
    lock_key: String,
    kind: TranscodeKind,
    output: OutputSettings,
    body: SuccessBody,
}

pub struct JobProcessor {
    config: Arc<Config>,
    scratch: ScratchDir,
    fetcher: Arc<dyn InputFetcher>,
    encoders: Arc<dyn EncoderFactory>,
    mutexes: Arc<dyn MutexCoordinator>,
    cancel: CancellationToken,
}

impl JobProcessor {
    pub fn new(
        config: Arc<Config>,
        fetcher: Arc<dyn InputFetcher>,
        encoders: Arc<dyn EncoderFactory>,
        mutexes: Arc<dyn MutexCoordinator>,
    ) -> Self {
        Self {
            scratch: ScratchDir::new(&config),
            config,
            fetcher,
            encoders,
            mutexes,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight stages when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run any kind of job.
    pub async fn process(
        &self,
        job: RunnerJob,
        server: Arc<dyn ResultReporter>,
        runner_token: &str,
    ) -> Result<()> {
        match job {
            RunnerJob::WebVideo(job) => self.process_web_video(job, server, runner_token).await,
            RunnerJob::Hls(job) => self.process_hls(job, server, runner_token).await,
            RunnerJob::AudioMerge(job) => self.process_audio_merge(job, server, runner_token).await,
        }
    }

    pub async fn process_web_video(
        &self,
        job: Job<WebVideoPayload>,
        server: Arc<dyn ResultReporter>,
        runner_token: &str,
    ) -> Result<()> {
        let identity = job.identity();
        let url = &job.payload.input.video_file_url;

        info!(job_uuid = %job.uuid, "Downloading input file {} for web video transcoding", url);
        let input = self.fetch(url, runner_token, &identity).await?;
        info!(job_uuid = %job.uuid, "Downloaded input file {}. Running web video transcoding.", url);

        let output = self.scratch.video_output(&job.uuid);
        let run = PreparedRun {
            lock_key: lock_key(&input),
            kind: TranscodeKind::Video {
                input_path: input.path().to_path_buf(),
                output_path: output.path().to_path_buf(),
            },
            output: job.payload.output,
            body: SuccessBody::WebVideo {
                video_file: output.path().to_path_buf(),
            },
            job: identity,
        };

        let outcome = self.transcode_and_report(run, server, runner_token).await;
        self.finish(&job.uuid, vec![input, output], outcome).await
    }

    pub async fn process_hls(
        &self,
        job: Job<HlsPayload>,
        server: Arc<dyn ResultReporter>,
        runner_token: &str,
    ) -> Result<()> {
        let identity = job.identity();
        let url = &job.payload.input.video_file_url;

        info!(job_uuid = %job.uuid, "Downloading input file {} for HLS transcoding", url);
        let input = self.fetch(url, runner_token, &identity).await?;
        info!(job_uuid = %job.uuid, "Downloaded input file {}. Running HLS transcoding.", url);

        let outputs = self.scratch.hls_outputs(&job.uuid, job.payload.output.resolution);
        let run = PreparedRun {
            lock_key: lock_key(&input),
            kind: TranscodeKind::Hls {
                input_path: input.path().to_path_buf(),
                playlist_path: outputs.playlist.path().to_path_buf(),
                video_filename: outputs.video_filename.clone(),
                copy_codecs: false,
            },
            output: job.payload.output,
            body: SuccessBody::Hls {
                resolution_playlist_file: outputs.playlist.path().to_path_buf(),
                video_file: outputs.video.path().to_path_buf(),
            },
            job: identity,
        };

        let outcome = self.transcode_and_report(run, server, runner_token).await;
        self.finish(&job.uuid, vec![input, outputs.playlist, outputs.video], outcome)
            .await
    }

    pub async fn process_audio_merge(
        &self,
        job: Job<AudioMergePayload>,
        server: Arc<dyn ResultReporter>,
        runner_token: &str,
    ) -> Result<()> {
        let identity = job.identity();
        let audio_url = &job.payload.input.audio_file_url;
        let preview_url = &job.payload.input.preview_file_url;

        info!(
            job_uuid = %job.uuid,
            "Downloading input files {} and {} for audio merge transcoding",
            audio_url,
            preview_url
        );
        let (audio, preview) = tokio::join!(
            self.fetch(audio_url, runner_token, &identity),
            self.fetch(preview_url, runner_token, &identity),
        );
        let (audio, preview) = match (audio, preview) {
            (Ok(audio), Ok(preview)) => (audio, preview),
            (Err(e), other) | (other, Err(e)) => {
                if let Ok(fetched) = other {
                    cleanup(vec![fetched]).await;
                }
                warn!(job_uuid = %job.uuid, "Job failed: {}", e);
                return Err(e);
            }
        };
        info!(
            job_uuid = %job.uuid,
            "Downloaded input files {} and {}. Running audio merge transcoding.",
            audio_url,
            preview_url
        );

        let output = self.scratch.video_output(&job.uuid);
        let run = PreparedRun {
            lock_key: lock_key(&audio),
            kind: TranscodeKind::MergeAudio {
                audio_path: audio.path().to_path_buf(),
                preview_path: preview.path().to_path_buf(),
                output_path: output.path().to_path_buf(),
            },
            output: job.payload.output,
            body: SuccessBody::AudioMerge {
                video_file: output.path().to_path_buf(),
            },
            job: identity,
        };

        let outcome = self.transcode_and_report(run, server, runner_token).await;
        self.finish(&job.uuid, vec![audio, preview, output], outcome).await
    }

    async fn fetch(&self, url: &str, runner_token: &str, job: &JobIdentity) -> Result<ScratchFile> {
        let outcome = self
            .stage(Stage::Fetch, self.fetcher.fetch(url, runner_token, job))
            .await;
        if let Err(e) = &outcome {
            warn!(job_uuid = %job.uuid, "Could not fetch {}: {}", url, e);
        }
        outcome
    }

    async fn transcode_and_report(
        &self,
        run: PreparedRun,
        server: Arc<dyn ResultReporter>,
        runner_token: &str,
    ) -> Result<()> {
        let PreparedRun {
            job,
            lock_key,
            kind,
            output,
            body,
        } = run;

        let encoder = self.encoders.build(EncodeContext {
            job: job.clone(),
            runner_token: runner_token.to_string(),
            server: server.clone(),
        });

        // Waiting for the lock is bounded by cancellation only, never by the
        // transcode timeout.
        let releaser = self.cancellable(self.mutexes.acquire(&lock_key)).await?;
        self.stage(Stage::Transcode, async {
            encoder
                .transcode(TranscodeRequest {
                    kind,
                    output,
                    releaser,
                })
                .await
        })
        .await?;

        let report = SuccessReport {
            job_token: job.job_token,
            job_uuid: job.uuid,
            runner_token: runner_token.to_string(),
            payload: body,
        };
        self.stage(Stage::Report, server.report_success(report)).await
    }

    /// Bound a stage by its timeout and by cancellation.
    async fn stage<T, F>(&self, stage: Stage, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = stage.limit(&self.config.worker);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RunnerError::Cancelled),
            outcome = tokio::time::timeout(limit, fut) => {
                outcome.unwrap_or_else(|_| Err(stage.timed_out(limit)))
            }
        }
    }

    async fn cancellable<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RunnerError::Cancelled),
            value = fut => Ok(value),
        }
    }

    async fn finish(&self, job_uuid: &str, files: Vec<ScratchFile>, outcome: Result<()>) -> Result<()> {
        let warnings = cleanup(files).await;
        match &outcome {
            Ok(()) => info!(
                job_uuid = %job_uuid,
                cleanup_warnings = warnings.len(),
                "Job completed"
            ),
            Err(e) => warn!(
                job_uuid = %job_uuid,
                cleanup_warnings = warnings.len(),
                error_kind = e.kind(),
                "Job failed: {}",
                e
            ),
        }
        outcome
    }
}

/// Inputs are locked by the local file the engine reads. Every run downloads
/// its own copy, so runs of the same source never wait on each other.
fn lock_key(input: &ScratchFile) -> String {
    input.path().to_string_lossy().to_string()
}

#[cfg(test)]
mod tests;
