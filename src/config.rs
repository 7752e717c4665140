use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, RunnerError};

fn default_hls_segment_duration() -> u32 {
    4
}

fn default_progress_interval_secs() -> u64 {
    5
}

/// Process-wide runner configuration.
///
/// Built once at startup and shared read-only behind an `Arc` with every
/// component that needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub transcoding: TranscodingConfig,
    pub ffmpeg: FfmpegConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodingConfig {
    /// Scratch directory shared by all jobs for inputs and outputs
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary, used to learn the input duration for progress
    pub probe_path: String,
    /// Encoder threads, 0 lets ffmpeg decide
    pub threads: u32,
    /// x264 preset (ultrafast, veryfast, fast, medium, slow)
    pub preset: String,
    /// x264 constant rate factor (0-51, lower = better quality)
    pub crf: u32,
    /// Target HLS segment duration in seconds
    #[serde(default = "default_hls_segment_duration")]
    pub hls_segment_duration: u32,
    /// Minimum delay between two progress updates sent to the coordinator
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of jobs allowed to run at the same time
    pub max_concurrent_jobs: usize,
    /// Upper bound for downloading one input file
    pub fetch_timeout_secs: u64,
    /// Upper bound for one engine invocation
    pub transcode_timeout_secs: u64,
    /// Upper bound for submitting a result
    pub report_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory receiving the daily rolling log file
    pub directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transcoding: TranscodingConfig {
                directory: std::env::temp_dir().join("vod-runner").join("transcoding"),
            },
            ffmpeg: FfmpegConfig {
                binary_path: "ffmpeg".to_string(),
                probe_path: "ffprobe".to_string(),
                threads: 0,
                preset: "veryfast".to_string(),
                crf: 23,
                hls_segment_duration: default_hls_segment_duration(),
                progress_interval_secs: default_progress_interval_secs(),
            },
            worker: WorkerConfig {
                max_concurrent_jobs: 2,
                fetch_timeout_secs: 30 * 60,
                transcode_timeout_secs: 6 * 60 * 60,
                report_timeout_secs: 30 * 60,
            },
            logging: LoggingConfig {
                directory: PathBuf::from(".vod-runner/log"),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RunnerError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| RunnerError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RunnerError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RunnerError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject values no job could run with.
    pub fn validate(&self) -> Result<()> {
        if self.transcoding.directory.as_os_str().is_empty() {
            return Err(RunnerError::Config("transcoding.directory must not be empty".to_string()));
        }
        if self.ffmpeg.binary_path.trim().is_empty() {
            return Err(RunnerError::Config("ffmpeg.binary_path must not be empty".to_string()));
        }
        if self.ffmpeg.crf > 51 {
            return Err(RunnerError::Config(format!(
                "ffmpeg.crf must be between 0 and 51, got {}",
                self.ffmpeg.crf
            )));
        }
        if self.worker.max_concurrent_jobs == 0 {
            return Err(RunnerError::Config("worker.max_concurrent_jobs must be at least 1".to_string()));
        }
        let timeouts = [
            ("fetch_timeout_secs", self.worker.fetch_timeout_secs),
            ("transcode_timeout_secs", self.worker.transcode_timeout_secs),
            ("report_timeout_secs", self.worker.report_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(RunnerError::Config(format!("worker.{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Scratch directory where every job places its transient files.
    pub fn transcoding_directory(&self) -> &Path {
        &self.transcoding.directory
    }
}

impl WorkerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }

    /// Longest a job can keep its scratch files: every stage at its limit.
    pub fn job_lifetime(&self) -> Duration {
        self.fetch_timeout() + self.transcode_timeout() + self.report_timeout()
    }
}
