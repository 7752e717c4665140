// Encoding adapter
//
// Everything the runner knows about the external engine goes through this
// module:
// - Encoder: one `transcode` call over a tagged request
// - FfmpegEncoder: ffmpeg/ffprobe implementation with progress reporting
// - Commands: engine command line builders
// - Progress: `-progress` output parsing and throttling

pub mod commands;
pub mod ffmpeg;
pub mod progress;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use commands::*;
pub use ffmpeg::*;

use crate::config::Config;
use crate::error::Result;
use crate::job::{JobIdentity, OutputSettings};
use crate::mutex::InputFileReleaser;
use crate::report::ResultReporter;

/// Input and output files of a transcode, by request shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeKind {
    /// One input to one progressive output file.
    Video {
        input_path: PathBuf,
        output_path: PathBuf,
    },
    /// One input to a playlist plus a fragmented video named `video_filename`
    /// next to it. Only the playlist is the declared primary output.
    Hls {
        input_path: PathBuf,
        playlist_path: PathBuf,
        video_filename: String,
        copy_codecs: bool,
    },
    /// Audio track plus still preview to one muxed output.
    MergeAudio {
        audio_path: PathBuf,
        preview_path: PathBuf,
        output_path: PathBuf,
    },
}

impl TranscodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            TranscodeKind::Video { .. } => "video",
            TranscodeKind::Hls { .. } => "hls",
            TranscodeKind::MergeAudio { .. } => "merge-audio",
        }
    }

    /// Input whose duration drives progress reporting.
    pub fn primary_input(&self) -> &Path {
        match self {
            TranscodeKind::Video { input_path, .. } => input_path,
            TranscodeKind::Hls { input_path, .. } => input_path,
            TranscodeKind::MergeAudio { audio_path, .. } => audio_path,
        }
    }

    /// Every file the engine is expected to leave on disk.
    pub fn expected_outputs(&self) -> Vec<PathBuf> {
        match self {
            TranscodeKind::Video { output_path, .. } => vec![output_path.clone()],
            TranscodeKind::Hls {
                playlist_path,
                video_filename,
                ..
            } => vec![playlist_path.clone(), hls_video_path(playlist_path, video_filename)],
            TranscodeKind::MergeAudio { output_path, .. } => vec![output_path.clone()],
        }
    }
}

/// Location of the fragmented video that belongs to `playlist_path`.
pub fn hls_video_path(playlist_path: &Path, video_filename: &str) -> PathBuf {
    playlist_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(video_filename)
}

/// A single transcode call.
///
/// `releaser` must be released exactly once, as soon as the encoder has
/// finished reading the inputs, and before `transcode` returns.
#[derive(Debug)]
pub struct TranscodeRequest {
    pub kind: TranscodeKind,
    pub output: OutputSettings,
    pub releaser: InputFileReleaser,
}

/// Uniform interface to the external encoding engine.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Resolves once every declared output exists on disk.
    async fn transcode(&self, request: TranscodeRequest) -> Result<()>;
}

/// Job, runner and coordinator an encoder reports progress to.
#[derive(Clone)]
pub struct EncodeContext {
    pub job: JobIdentity,
    pub runner_token: String,
    pub server: Arc<dyn ResultReporter>,
}

/// Builds an encoder bound to one job run.
pub trait EncoderFactory: Send + Sync {
    fn build(&self, context: EncodeContext) -> Box<dyn Encoder>;
}

/// Factory for the ffmpeg-based encoder.
pub struct FfmpegEncoderFactory {
    config: Arc<Config>,
}

impl FfmpegEncoderFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn build(&self, context: EncodeContext) -> Box<dyn Encoder> {
        Box::new(FfmpegEncoder::new(&self.config.ffmpeg, context))
    }
}
