use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde_json::json;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::{Result, RunnerError};
use super::{FailureReport, ProgressUpdate, ResultReporter, SuccessReport};

/// HTTP client for the coordinator's runner job endpoints.
#[derive(Debug, Clone)]
pub struct ServerClient {
    base_url: String,
    client: Client,
}

impl ServerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("vod-runner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RunnerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn job_url(&self, job_uuid: &str, action: &str) -> String {
        format!("{}/api/v1/runners/jobs/{}/{}", self.base_url, job_uuid, action)
    }

    async fn check_response(response: Response, what: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RunnerError::Report(format!("{} rejected: HTTP {} {}", what, status, body.trim())))
    }
}

/// Multipart part streaming `path` from disk. The whole file is sent by the
/// time the request future resolves.
async fn file_part(field: &str, path: &Path) -> Result<Part> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        RunnerError::Report(format!("Failed to open artifact {}: {}", path.display(), e))
    })?;
    let length = file
        .metadata()
        .await
        .map_err(|e| RunnerError::Report(format!("Failed to stat artifact {}: {}", path.display(), e)))?
        .len();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| field.to_string());

    debug!("Attaching {} ({} bytes) as payload[{}]", path.display(), length, field);
    let body = Body::wrap_stream(ReaderStream::new(file));
    Ok(Part::stream_with_length(body, length).file_name(file_name))
}

#[async_trait]
impl ResultReporter for ServerClient {
    async fn report_success(&self, report: SuccessReport) -> Result<()> {
        info!(job_uuid = %report.job_uuid, "Submitting {} result", report.payload.kind());

        let mut form = Form::new()
            .text("runnerToken", report.runner_token.clone())
            .text("jobToken", report.job_token.clone());

        for (field, path) in report.payload.files() {
            form = form.part(format!("payload[{}]", field), file_part(field, path).await?);
        }

        let response = self
            .client
            .post(self.job_url(&report.job_uuid, "success"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| RunnerError::Report(format!("Failed to submit result: {}", e)))?;

        Self::check_response(response, "Result submission").await?;

        info!(job_uuid = %report.job_uuid, "Result accepted by coordinator");
        Ok(())
    }

    async fn report_error(&self, report: FailureReport) -> Result<()> {
        info!(job_uuid = %report.job_uuid, "Reporting failure: {}", report.message);

        let response = self
            .client
            .post(self.job_url(&report.job_uuid, "error"))
            .json(&json!({
                "runnerToken": report.runner_token,
                "jobToken": report.job_token,
                "message": report.message,
            }))
            .send()
            .await
            .map_err(|e| RunnerError::Report(format!("Failed to submit failure: {}", e)))?;

        Self::check_response(response, "Failure report").await
    }

    async fn update_progress(&self, update: ProgressUpdate) -> Result<()> {
        debug!(job_uuid = %update.job_uuid, "Progress {}%", update.progress);

        let response = self
            .client
            .post(self.job_url(&update.job_uuid, "update"))
            .json(&json!({
                "runnerToken": update.runner_token,
                "jobToken": update.job_token,
                "progress": update.progress,
            }))
            .send()
            .await
            .map_err(|e| RunnerError::Report(format!("Failed to send progress: {}", e)))?;

        Self::check_response(response, "Progress update").await
    }
}
