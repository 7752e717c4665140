use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Result, RunnerError};
use crate::job::JobIdentity;
use crate::scratch::{ScratchDir, ScratchFile};
use super::InputFetcher;

/// Downloads job inputs from the coordinator.
///
/// The coordinator expects a `POST` carrying the runner and job tokens; the
/// response body is the raw input file.
pub struct HttpInputFetcher {
    client: Client,
    scratch: ScratchDir,
}

impl HttpInputFetcher {
    pub fn new(scratch: ScratchDir) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("vod-runner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RunnerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, scratch })
    }
}

#[async_trait]
impl InputFetcher for HttpInputFetcher {
    async fn fetch(&self, url: &str, runner_token: &str, job: &JobIdentity) -> Result<ScratchFile> {
        // Reserved before the request so a failed download removes its partial file.
        let file = self.scratch.input_file(&job.uuid);
        info!(job_uuid = %job.uuid, "Downloading {} to {}", url, file.path().display());

        let mut response = self
            .client
            .post(url)
            .json(&json!({
                "runnerToken": runner_token,
                "jobToken": job.job_token,
            }))
            .send()
            .await
            .map_err(|e| RunnerError::Fetch(format!("Failed to request {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RunnerError::Fetch(format!("Failed to download {}: HTTP {}", url, status)));
        }

        let mut out = fs::File::create(file.path()).await.map_err(|e| {
            RunnerError::Fetch(format!("Failed to create {}: {}", file.path().display(), e))
        })?;

        let mut downloaded: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| RunnerError::Fetch(format!("Failed to read body of {}: {}", url, e)))?
        {
            out.write_all(&chunk).await.map_err(|e| {
                RunnerError::Fetch(format!("Failed to write {}: {}", file.path().display(), e))
            })?;
            downloaded += chunk.len() as u64;
        }

        out.flush().await.map_err(|e| {
            RunnerError::Fetch(format!("Failed to flush {}: {}", file.path().display(), e))
        })?;
        drop(out);

        debug!(job_uuid = %job.uuid, "Downloaded {} bytes from {}", downloaded, url);
        Ok(file)
    }
}
