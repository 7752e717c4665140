// Result submission to the coordinator
//
// - ResultReporter: the seam processors and encoders talk to
// - ServerClient: HTTP implementation against the coordinator's runner API

pub mod server;

use async_trait::async_trait;

pub use server::*;

use crate::error::Result;
use crate::job::SuccessBody;

/// Identifiers plus artifacts for a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessReport {
    pub job_token: String,
    pub job_uuid: String,
    pub runner_token: String,
    pub payload: SuccessBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub job_token: String,
    pub job_uuid: String,
    pub runner_token: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub job_token: String,
    pub job_uuid: String,
    pub runner_token: String,
    /// Percentage in 0..=100
    pub progress: u8,
}

/// Coordinator endpoints used while running a job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultReporter: Send + Sync {
    /// Submit the artifacts of a finished job.
    ///
    /// Every file referenced by the payload is fully read and transmitted
    /// before this returns; callers delete those files right afterwards.
    async fn report_success(&self, report: SuccessReport) -> Result<()>;

    /// Tell the coordinator this attempt failed.
    async fn report_error(&self, report: FailureReport) -> Result<()>;

    /// Push encoding progress for a running job.
    async fn update_progress(&self, update: ProgressUpdate) -> Result<()>;
}
