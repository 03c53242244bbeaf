//! Fixed-interval status polling.

use reqwest::header::AUTHORIZATION;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use genjob_types::{Job, JobStatus, PollAttempt, PollPolicy};

use crate::credential::Credential;
use crate::error::{JobError, Result};
use crate::http::ApiClient;
use crate::vendor::Vendor;

/// Callback invoked after every status request.
pub type PollObserver = dyn Fn(&PollAttempt) + Send + Sync;

/// Polls one vendor's status endpoint until a job settles.
pub struct Poller<'a> {
    vendor: &'a dyn Vendor,
    api: &'a ApiClient,
    policy: PollPolicy,
}

impl<'a> Poller<'a> {
    pub fn new(vendor: &'a dyn Vendor, api: &'a ApiClient, policy: PollPolicy) -> Self {
        Self {
            vendor,
            api,
            policy,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Perform one status request and fold the answer into `job`.
    pub async fn poll_once(&self, job: &mut Job, credential: &mut Credential) -> Result<PollAttempt> {
        let url = self.vendor.status_url(&job.task_type, &job.job_id);
        let request = self
            .api
            .get(&url)
            .header(AUTHORIZATION, credential.header_value());
        let reply = self.api.execute(request, "status request").await?;

        if reply.is_auth_rejection() {
            return Err(JobError::Auth(format!(
                "{} rejected credentials ({}): {}",
                self.vendor.name(),
                reply.status.as_u16(),
                reply.error_message(self.vendor)
            )));
        }
        if !reply.status.is_success() {
            return Err(JobError::StatusQuery {
                status: Some(reply.status.as_u16()),
                message: reply.error_message(self.vendor),
            });
        }
        let Some(body) = reply.json.clone() else {
            return Err(JobError::StatusQuery {
                status: Some(reply.status.as_u16()),
                message: format!("response is not JSON: {}", reply.error_message(self.vendor)),
            });
        };

        let report = self
            .vendor
            .parse_status(&body)
            .map_err(|message| JobError::StatusQuery {
                status: Some(reply.status.as_u16()),
                message,
            })?;

        job.poll_count += 1;
        job.status = report.status;
        if report.failure_reason.is_some() {
            job.failure_reason = report.failure_reason;
        }
        if !report.output.is_empty() {
            job.output = report.output;
        }
        job.last_response = Some(body.clone());

        debug!(
            job_id = %job.job_id,
            attempt = job.poll_count,
            raw_status = %report.raw_status,
            status = %job.status,
            "Polled job"
        );

        Ok(PollAttempt {
            attempt: job.poll_count,
            at: chrono::Utc::now(),
            raw_status: report.raw_status,
            status: job.status,
            response: body,
        })
    }

    /// Poll until the job succeeds, fails or the policy timeout elapses.
    ///
    /// Always performs at least one request. On timeout the job comes back
    /// with status `TimedOut` and its id intact so it can be resumed later.
    pub async fn poll_until_terminal(
        &self,
        mut job: Job,
        credential: &mut Credential,
        cancel: &CancellationToken,
        observer: Option<&PollObserver>,
    ) -> Result<Job> {
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled {
                    job_id: job.job_id.clone(),
                });
            }

            credential.refresh_if_needed(self.policy.interval)?;
            let attempt = self.poll_once(&mut job, credential).await?;
            if let Some(observer) = observer {
                observer(&attempt);
            }

            if job.status.is_terminal() {
                info!(
                    job_id = %job.job_id,
                    status = %job.status,
                    polls = job.poll_count,
                    "Job settled"
                );
                return Ok(job);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.policy.timeout {
                warn!(
                    job_id = %job.job_id,
                    elapsed_secs = elapsed.as_secs(),
                    "Giving up polling; job may still be running remotely"
                );
                job.status = JobStatus::TimedOut;
                return Ok(job);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(JobError::Cancelled { job_id: job.job_id.clone() });
                }
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }
    }
}
