//! Submit → poll → fetch, as one call with stage-tagged failures.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use genjob_types::{Job, JobClass, JobStatus, PollPolicy, ResultSelection};

use crate::credential::Credential;
use crate::error::{JobError, JobFailure, Result, Stage};
use crate::fetcher::{Artifact, ResultFetcher};
use crate::http::ApiClient;
use crate::poller::{PollObserver, Poller};
use crate::submitter::{JobRequest, Submitter};
use crate::vendor::Vendor;

/// Reference to an already-submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub task_type: String,
    pub class: JobClass,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, task_type: impl Into<String>, class: JobClass) -> Self {
        Self {
            job_id: job_id.into(),
            task_type: task_type.into(),
            class,
        }
    }
}

/// A succeeded job and the artifacts saved for it.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: Job,
    pub artifacts: Vec<Artifact>,
}

/// Runs jobs against one vendor.
///
/// Holds only read-only state; each call works on its own copy of the
/// credential, so independent runs may proceed concurrently.
pub struct Orchestrator {
    vendor: Arc<dyn Vendor>,
    credential: Credential,
    api: ApiClient,
    fetcher: ResultFetcher,
    policies: HashMap<JobClass, PollPolicy>,
    observer: Option<Arc<PollObserver>>,
}

impl Orchestrator {
    pub fn new(
        vendor: Arc<dyn Vendor>,
        credential: Credential,
        api: ApiClient,
        fetcher: ResultFetcher,
    ) -> Self {
        Self {
            vendor,
            credential,
            api,
            fetcher,
            policies: HashMap::new(),
            observer: None,
        }
    }

    /// Override the poll interval and timeout of one job class.
    pub fn with_policy(mut self, class: JobClass, policy: PollPolicy) -> Self {
        self.policies.insert(class, policy);
        self
    }

    pub fn with_observer(mut self, observer: Arc<PollObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn vendor(&self) -> &dyn Vendor {
        self.vendor.as_ref()
    }

    /// Effective policy for `class`. Network timeouts must stay below the
    /// job timeout.
    pub fn policy(&self, class: JobClass) -> Result<PollPolicy> {
        let policy = self
            .policies
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_policy());
        if policy.interval.is_zero() {
            return Err(JobError::Configuration(format!(
                "poll interval for {class:?} jobs must be positive"
            )));
        }
        let request = self.api.request_timeout();
        let download = self.fetcher.download_timeout();
        if request >= policy.timeout || download >= policy.timeout {
            return Err(JobError::Configuration(format!(
                "request timeout ({}s) and download timeout ({}s) must be shorter than the {class:?} job timeout ({}s)",
                request.as_secs_f64(),
                download.as_secs_f64(),
                policy.timeout.as_secs_f64()
            )));
        }
        Ok(policy)
    }

    /// Submit a new job, wait for it and download its result.
    pub async fn run(
        &self,
        request: JobRequest,
        selection: &ResultSelection,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<JobOutcome, JobFailure> {
        let policy = self
            .policy(request.class)
            .map_err(|e| JobFailure::new(Stage::Configuration, None, e))?;
        let mut credential = self.credential.clone();

        let job = Submitter::new(self.vendor.as_ref(), &self.api)
            .submit(request, &mut credential)
            .await
            .map_err(|e| JobFailure::new(Stage::Submission, None, e))?;

        self.settle(job, policy, &mut credential, selection, dest, cancel)
            .await
    }

    /// Wait for an already-submitted job and download its result.
    pub async fn resume(
        &self,
        handle: JobHandle,
        selection: &ResultSelection,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<JobOutcome, JobFailure> {
        let job_id = handle.job_id.clone();
        let policy = self
            .policy(handle.class)
            .map_err(|e| JobFailure::new(Stage::Configuration, Some(job_id.clone()), e))?;
        let mut credential = self.credential.clone();

        info!(vendor = self.vendor.name(), job_id = %job_id, "Resuming job");
        let job = Job::submitted(handle.job_id, self.vendor.name(), handle.task_type, handle.class);
        self.settle(job, policy, &mut credential, selection, dest, cancel)
            .await
    }

    /// Read a job's current status once, without waiting.
    pub async fn status(
        &self,
        task_type: &str,
        job_id: &str,
    ) -> std::result::Result<Job, JobFailure> {
        let mut credential = self.credential.clone();
        let tag = |e: JobError| JobFailure::new(Stage::Polling, Some(job_id.to_string()), e);

        credential
            .refresh_if_needed(self.api.request_timeout())
            .map_err(tag)?;
        let mut job = Job::submitted(job_id, self.vendor.name(), task_type, JobClass::Generation);
        let poller = Poller::new(
            self.vendor.as_ref(),
            &self.api,
            JobClass::Generation.default_policy(),
        );
        poller
            .poll_once(&mut job, &mut credential)
            .await
            .map_err(tag)?;
        Ok(job)
    }

    async fn settle(
        &self,
        job: Job,
        policy: PollPolicy,
        credential: &mut Credential,
        selection: &ResultSelection,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<JobOutcome, JobFailure> {
        let job_id = job.job_id.clone();
        let tag = |stage: Stage, e: JobError| JobFailure::new(stage, Some(job_id.clone()), e);

        let started = Instant::now();
        let poller = Poller::new(self.vendor.as_ref(), &self.api, policy);
        let job = poller
            .poll_until_terminal(job, credential, cancel, self.observer.as_deref())
            .await
            .map_err(|e| tag(Stage::Polling, e))?;

        match job.status {
            JobStatus::Succeeded => {
                let artifacts = self
                    .fetcher
                    .fetch(&job.output, selection, dest)
                    .await
                    .map_err(|e| tag(Stage::Fetch, e))?;
                info!(
                    vendor = self.vendor.name(),
                    job_id = %job.job_id,
                    artifacts = artifacts.len(),
                    "Job completed"
                );
                Ok(JobOutcome { job, artifacts })
            }
            JobStatus::Failed => {
                let message = job
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string());
                warn!(job_id = %job.job_id, reason = %message, "Job failed remotely");
                Err(tag(
                    Stage::Polling,
                    JobError::RemoteFailure {
                        job_id: job.job_id.clone(),
                        message,
                    },
                ))
            }
            _ => Err(tag(
                Stage::Polling,
                JobError::PollTimeout {
                    job_id: job.job_id.clone(),
                    elapsed: started.elapsed(),
                },
            )),
        }
    }
}
