use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::FfmpegConfig;
use crate::error::{Result, RunnerError};
use crate::report::ProgressUpdate;
use super::progress::{parse_duration, ProgressTracker};
use super::{
    hls_video_path, probe_duration_command, EncodeContext, Encoder, EngineCommand,
    EngineCommandBuilder, TranscodeKind, TranscodeRequest,
};

/// Lines of engine stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Progress updates queued while one is in flight.
const PROGRESS_BACKLOG: usize = 16;

/// Encoder driving the ffmpeg binary for one job.
pub struct FfmpegEncoder {
    command_builder: EngineCommandBuilder,
    probe_path: String,
    progress_interval: Duration,
    context: EncodeContext,
}

impl FfmpegEncoder {
    pub fn new(config: &FfmpegConfig, context: EncodeContext) -> Self {
        Self {
            command_builder: EngineCommandBuilder::new(config),
            probe_path: config.probe_path.clone(),
            progress_interval: Duration::from_secs(config.progress_interval_secs),
            context,
        }
    }

    fn command_for(&self, request: &TranscodeRequest) -> EngineCommand {
        let settings = &request.output;
        match &request.kind {
            TranscodeKind::Video { input_path, output_path } => {
                self.command_builder
                    .video(input_path.as_path(), output_path.as_path(), settings)
            }
            TranscodeKind::Hls {
                input_path,
                playlist_path,
                video_filename,
                copy_codecs,
            } => {
                let segment_file = hls_video_path(playlist_path, video_filename);
                self.command_builder.hls(
                    input_path.as_path(),
                    playlist_path.as_path(),
                    segment_file.as_path(),
                    *copy_codecs,
                    settings,
                )
            }
            TranscodeKind::MergeAudio {
                audio_path,
                preview_path,
                output_path,
            } => self.command_builder.merge_audio(
                audio_path.as_path(),
                preview_path.as_path(),
                output_path.as_path(),
                settings,
            ),
        }
    }

    /// Input duration in seconds, when ffprobe can tell.
    async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let command = probe_duration_command(&self.probe_path, input);
        let output = Command::new(&command.binary_path)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                parse_duration(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!("Duration probe failed with {}", output.status);
                None
            }
            Err(e) => {
                debug!("Duration probe unavailable: {}", e);
                None
            }
        }
    }

    /// Send queued progress updates in order until the sender side closes.
    async fn forward_progress(&self, mut updates: mpsc::Receiver<u8>) {
        while let Some(progress) = updates.recv().await {
            let update = ProgressUpdate {
                job_token: self.context.job.job_token.clone(),
                job_uuid: self.context.job.uuid.clone(),
                runner_token: self.context.runner_token.clone(),
                progress,
            };
            if let Err(e) = self.context.server.update_progress(update).await {
                warn!(job_uuid = %self.context.job.uuid, "Could not send progress update: {}", e);
            }
        }
    }

    /// Run the engine to completion. Dropping the future kills the process.
    ///
    /// Progress updates are sent concurrently with reading the engine output
    /// and have all completed when this returns.
    async fn execute(&self, command: &EngineCommand, duration: Option<f64>) -> Result<()> {
        debug!("Executing engine command: {}", command.command_line());

        let mut child = Command::new(&command.binary_path)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Encode(format!("Failed to execute {}: {}", command.binary_path, e)))?;

        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(collect_tail(stderr)));

        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_BACKLOG);
        let stdout = child.stdout.take();
        let mut tracker = ProgressTracker::new(duration, self.progress_interval);
        let read_progress = async move {
            let Some(stdout) = stdout else {
                return Ok::<(), RunnerError>(());
            };
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| RunnerError::Encode(format!("Failed to read engine output: {}", e)))?
            {
                if let Some(progress) = tracker.observe(&line) {
                    // Never blocks on the coordinator.
                    if progress_tx.try_send(progress).is_err() {
                        debug!("Progress backlog full, skipping {}%", progress);
                    }
                }
            }
            Ok::<(), RunnerError>(())
        };
        let (read_outcome, ()) = tokio::join!(read_progress, self.forward_progress(progress_rx));
        read_outcome?;

        let status = child
            .wait()
            .await
            .map_err(|e| RunnerError::Encode(format!("Failed to wait for engine: {}", e)))?;

        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(RunnerError::Encode(format!(
                "{} failed ({}): {}",
                command.description,
                status,
                stderr_tail.trim()
            )));
        }

        Ok(())
    }
}

/// Keep the last lines of a stream.
async fn collect_tail<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Every declared output must exist and be non-empty.
async fn verify_outputs(kind: &TranscodeKind) -> Result<()> {
    for path in kind.expected_outputs() {
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            Ok(_) => {
                return Err(RunnerError::Encode(format!(
                    "Malformed output: {} is empty",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(RunnerError::Encode(format!(
                    "Malformed output: {} was not produced: {}",
                    path.display(),
                    e
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn transcode(&self, request: TranscodeRequest) -> Result<()> {
        info!(
            job_uuid = %self.context.job.uuid,
            "Running {} transcode at {}p {}fps",
            request.kind.name(),
            request.output.resolution,
            request.output.fps
        );

        let command = self.command_for(&request);
        let TranscodeRequest { kind, releaser, .. } = request;

        let duration = self.probe_duration(kind.primary_input()).await;
        let outcome = self.execute(&command, duration).await;

        // The engine has exited, so no more input is read.
        releaser.release();
        outcome?;

        verify_outputs(&kind).await?;

        info!(job_uuid = %self.context.job.uuid, "{} completed", command.description);
        Ok(())
    }
}
