//! Scratch directory shared by all jobs and the per-job files living in it.
//!
//! Jobs never lock the directory; they stay apart because every name carries
//! a fresh random UUID. A `ScratchFile` owns its path: it is removed either
//! explicitly through [`ScratchFile::remove`] or, if the owning future is
//! dropped (cancellation, panic), synchronously on drop.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::Result;

/// Non-fatal failure to remove a scratch file. Logged, never escalated.
#[derive(Error, Debug)]
#[error("failed to remove scratch file {} of job {owner}: {source}", .path.display())]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub owner: String,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

/// Reserved HLS output pair. Only the playlist is the engine's declared
/// output; the fragmented video name is handed to the engine separately.
#[derive(Debug)]
pub struct HlsOutputs {
    pub playlist: ScratchFile,
    pub video: ScratchFile,
    pub video_filename: String,
}

impl ScratchDir {
    pub fn new(config: &Config) -> Self {
        Self::from_path(config.transcoding_directory())
    }

    pub fn from_path<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory if it does not exist yet.
    pub async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Remove files left behind by runs that did not exit cleanly.
    ///
    /// Only regular files named the way this runner names its scratch files
    /// and untouched for at least `min_age` are removed. Anything else in the
    /// directory, including files of runners still working in it, is left alone.
    pub fn purge_stale(&self, min_age: Duration) -> Result<usize> {
        if !self.root.is_dir() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_scratch_name(&e.file_name().to_string_lossy()))
        {
            let age = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .map(|modified| now.duration_since(modified).unwrap_or_default());
            if !age.is_some_and(|age| age >= min_age) {
                continue;
            }

            let path = entry.path();
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not purge stale scratch file {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("Purged {} stale files from {}", removed, self.root.display());
        }
        Ok(removed)
    }

    /// Reserve a uniquely named file for a downloaded input.
    pub fn input_file(&self, owner: &str) -> ScratchFile {
        ScratchFile::new(self.root.join(Uuid::new_v4().to_string()), owner)
    }

    /// Reserve `output-<uuid>.mp4` for a progressive video output.
    pub fn video_output(&self, owner: &str) -> ScratchFile {
        ScratchFile::new(self.root.join(format!("output-{}.mp4", Uuid::new_v4())), owner)
    }

    /// Reserve `<uuid>-<resolution>.m3u8` and `<uuid>-<resolution>-fragmented.mp4`.
    pub fn hls_outputs(&self, owner: &str, resolution: u32) -> HlsOutputs {
        let id = Uuid::new_v4();
        let video_filename = format!("{}-{}-fragmented.mp4", id, resolution);

        HlsOutputs {
            playlist: ScratchFile::new(self.root.join(format!("{}-{}.m3u8", id, resolution)), owner),
            video: ScratchFile::new(self.root.join(&video_filename), owner),
            video_filename,
        }
    }
}

/// Whether `name` is one of `<uuid>`, `output-<uuid>.mp4`,
/// `<uuid>-<res>.m3u8` or `<uuid>-<res>-fragmented.mp4`.
fn is_scratch_name(name: &str) -> bool {
    fn is_uuid(s: &str) -> bool {
        s.len() == 36 && Uuid::parse_str(s).is_ok()
    }

    if is_uuid(name) {
        return true;
    }
    if let Some(id) = name.strip_prefix("output-").and_then(|r| r.strip_suffix(".mp4")) {
        return is_uuid(id);
    }
    let stem = match name
        .strip_suffix("-fragmented.mp4")
        .or_else(|| name.strip_suffix(".m3u8"))
    {
        Some(stem) => stem,
        None => return false,
    };
    match stem.rsplit_once('-') {
        Some((id, resolution)) => {
            is_uuid(id) && !resolution.is_empty() && resolution.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// A transient file exclusively owned by one running job.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    owner: String,
    armed: bool,
}

impl ScratchFile {
    pub fn new<P: Into<PathBuf>>(path: P, owner: &str) -> Self {
        Self {
            path: path.into(),
            owner: owner.to_string(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// UUID of the job owning this file.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Remove the file. A file that was never created counts as removed.
    pub async fn remove(mut self) -> std::result::Result<(), CleanupWarning> {
        self.armed = false;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Removed scratch file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CleanupWarning {
                path: std::mem::take(&mut self.path),
                owner: std::mem::take(&mut self.owner),
                source,
            }),
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed scratch file {} on drop", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                job_uuid = %self.owner,
                "Failed to remove scratch file {} on drop: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Remove every file, logging each failure. Returns the warnings so callers
/// can count them; they are never turned into job errors.
pub async fn cleanup(files: Vec<ScratchFile>) -> Vec<CleanupWarning> {
    let mut warnings = Vec::new();
    for file in files {
        if let Err(warning) = file.remove().await {
            warn!(job_uuid = %warning.owner, "{}", warning);
            warnings.push(warning);
        }
    }
    warnings
}
