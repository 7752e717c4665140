//! Job descriptions received from the coordinator and the result bodies
//! sent back to it.
//!
//! Each operation kind is a closed set of types: adding a kind means adding
//! a `RunnerJob` variant, a `JobKind` variant and a `SuccessBody` variant,
//! and every `match` over them has to follow.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Target rendition for an encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Output height in pixels
    pub resolution: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInput {
    pub video_file_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMergeInput {
    pub audio_file_url: String,
    /// Still image shown for the whole duration of the audio track
    pub preview_file_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebVideoPayload {
    pub input: VideoInput,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HlsPayload {
    pub input: VideoInput,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMergePayload {
    pub input: AudioMergeInput,
    pub output: OutputSettings,
}

/// One unit of work, owned by the processor for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job<P> {
    pub job_token: String,
    pub uuid: String,
    pub payload: P,
}

/// Identifiers of a job, detached from its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdentity {
    pub job_token: String,
    pub uuid: String,
}

impl<P> Job<P> {
    pub fn identity(&self) -> JobIdentity {
        JobIdentity {
            job_token: self.job_token.clone(),
            uuid: self.uuid.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "vod-web-video-transcoding")]
    WebVideo,
    #[serde(rename = "vod-hls-transcoding")]
    Hls,
    #[serde(rename = "vod-audio-merge-transcoding")]
    AudioMerge,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::WebVideo => "vod-web-video-transcoding",
            JobKind::Hls => "vod-hls-transcoding",
            JobKind::AudioMerge => "vod-audio-merge-transcoding",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of a claimed job: `{uuid, jobToken, type, payload}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    uuid: String,
    job_token: String,
    #[serde(rename = "type")]
    kind: JobKind,
    payload: serde_json::Value,
}

/// A claimed job of any supported kind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "JobEnvelope")]
pub enum RunnerJob {
    WebVideo(Job<WebVideoPayload>),
    Hls(Job<HlsPayload>),
    AudioMerge(Job<AudioMergePayload>),
}

impl TryFrom<JobEnvelope> for RunnerJob {
    type Error = serde_json::Error;

    fn try_from(envelope: JobEnvelope) -> Result<Self, Self::Error> {
        let JobEnvelope { uuid, job_token, kind, payload } = envelope;
        Ok(match kind {
            JobKind::WebVideo => RunnerJob::WebVideo(Job {
                job_token,
                uuid,
                payload: serde_json::from_value(payload)?,
            }),
            JobKind::Hls => RunnerJob::Hls(Job {
                job_token,
                uuid,
                payload: serde_json::from_value(payload)?,
            }),
            JobKind::AudioMerge => RunnerJob::AudioMerge(Job {
                job_token,
                uuid,
                payload: serde_json::from_value(payload)?,
            }),
        })
    }
}

impl RunnerJob {
    pub fn kind(&self) -> JobKind {
        match self {
            RunnerJob::WebVideo(_) => JobKind::WebVideo,
            RunnerJob::Hls(_) => JobKind::Hls,
            RunnerJob::AudioMerge(_) => JobKind::AudioMerge,
        }
    }

    pub fn uuid(&self) -> &str {
        match self {
            RunnerJob::WebVideo(job) => &job.uuid,
            RunnerJob::Hls(job) => &job.uuid,
            RunnerJob::AudioMerge(job) => &job.uuid,
        }
    }

    pub fn job_token(&self) -> &str {
        match self {
            RunnerJob::WebVideo(job) => &job.job_token,
            RunnerJob::Hls(job) => &job.job_token,
            RunnerJob::AudioMerge(job) => &job.job_token,
        }
    }
}

/// Kind-specific artifact references submitted on success.
///
/// Every path must stay readable until the submission call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessBody {
    WebVideo {
        video_file: PathBuf,
    },
    Hls {
        resolution_playlist_file: PathBuf,
        video_file: PathBuf,
    },
    AudioMerge {
        video_file: PathBuf,
    },
}

impl SuccessBody {
    /// Artifact files keyed by their coordinator field name.
    pub fn files(&self) -> Vec<(&'static str, &Path)> {
        match self {
            SuccessBody::WebVideo { video_file } => vec![("videoFile", video_file.as_path())],
            SuccessBody::Hls {
                resolution_playlist_file,
                video_file,
            } => vec![
                ("resolutionPlaylistFile", resolution_playlist_file.as_path()),
                ("videoFile", video_file.as_path()),
            ],
            SuccessBody::AudioMerge { video_file } => vec![("videoFile", video_file.as_path())],
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            SuccessBody::WebVideo { .. } => JobKind::WebVideo,
            SuccessBody::Hls { .. } => JobKind::Hls,
            SuccessBody::AudioMerge { .. } => JobKind::AudioMerge,
        }
    }
}
