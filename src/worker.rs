//! Bounded pool that runs accepted jobs and reports failures.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Result, RunnerError};
use crate::job::{JobKind, RunnerJob};
use crate::processor::JobProcessor;
use crate::report::{FailureReport, ResultReporter};

/// How a single job ended.
#[derive(Debug)]
pub struct JobOutcome {
    pub job_uuid: String,
    pub kind: JobKind,
    pub result: Result<()>,
}

pub struct Worker {
    processor: Arc<JobProcessor>,
    server: Arc<dyn ResultReporter>,
    runner_token: String,
    job_semaphore: Arc<Semaphore>,
    max_concurrent_jobs: usize,
}

impl Worker {
    /// Jobs share `processor`'s cancellation token.
    pub fn new(
        processor: Arc<JobProcessor>,
        server: Arc<dyn ResultReporter>,
        runner_token: &str,
        max_concurrent_jobs: usize,
    ) -> Self {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        Self {
            processor,
            server,
            runner_token: runner_token.to_string(),
            job_semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.processor.cancellation_token().clone()
    }

    /// Abort every running job. Their scratch files are still removed.
    pub fn shutdown(&self) {
        info!("Shutdown requested, cancelling running jobs");
        self.processor.cancellation_token().cancel();
    }

    /// Run `jobs` with at most `max_concurrent_jobs` in flight and wait for
    /// all of them. Outcomes come back in submission order.
    pub async fn run_jobs(&self, jobs: Vec<RunnerJob>) -> Vec<JobOutcome> {
        info!(
            "Running {} jobs with {} max concurrent jobs",
            jobs.len(),
            self.max_concurrent_jobs
        );
        let cancel = self.cancellation_token();

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let job_uuid = job.uuid().to_string();
            let kind = job.kind();

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = self.job_semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                warn!(job_uuid = %job_uuid, "Job not started, worker is shutting down");
                handles.push((job_uuid, kind, None));
                continue;
            };

            let processor = Arc::clone(&self.processor);
            let server = Arc::clone(&self.server);
            let runner_token = self.runner_token.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(processor, server, runner_token, job).await
            });
            handles.push((job_uuid, kind, Some(handle)));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (job_uuid, kind, handle) in handles {
            let result = match handle {
                None => Err(RunnerError::Cancelled),
                Some(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Err(_) => Err(RunnerError::Cancelled),
                },
            };
            outcomes.push(JobOutcome {
                job_uuid,
                kind,
                result,
            });
        }

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(
            "Finished {} jobs: {} succeeded, {} failed",
            outcomes.len(),
            outcomes.len() - failed,
            failed
        );
        outcomes
    }

    async fn execute_job(
        processor: Arc<JobProcessor>,
        server: Arc<dyn ResultReporter>,
        runner_token: String,
        job: RunnerJob,
    ) -> Result<()> {
        let job_uuid = job.uuid().to_string();
        let job_token = job.job_token().to_string();
        let kind = job.kind();
        info!(job_uuid = %job_uuid, "Processing {} job", kind);

        let result = processor.process(job, Arc::clone(&server), &runner_token).await;

        if let Err(e) = &result {
            error!(job_uuid = %job_uuid, error_kind = e.kind(), "{} job failed: {}", kind, e);
            let report = FailureReport {
                job_token,
                job_uuid: job_uuid.clone(),
                runner_token,
                message: e.to_string(),
            };
            if let Err(report_err) = server.report_error(report).await {
                warn!(job_uuid = %job_uuid, "Could not report failure to the server: {}", report_err);
            }
        }
        result
    }
}
