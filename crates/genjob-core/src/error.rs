//! Error taxonomy for the submit → poll → fetch pipeline.

use std::time::Duration;

use thiserror::Error;

/// Error raised by a single pipeline stage.
#[derive(Debug, Error)]
pub enum JobError {
    /// Missing or malformed configuration (credentials, timeouts).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credential could not be produced or was rejected.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Job creation was rejected.
    #[error("submission rejected{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Submission { status: Option<u16>, message: String },

    /// A status request was rejected or returned an unreadable body.
    #[error("status request failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    StatusQuery { status: Option<u16>, message: String },

    /// The per-class timeout elapsed while the job was still running remotely.
    #[error("job {job_id} still running after {}s; check again later with its job id", .elapsed.as_secs())]
    PollTimeout { job_id: String, elapsed: Duration },

    /// The job reached the remote `failed` state.
    #[error("{message}")]
    RemoteFailure { job_id: String, message: String },

    /// The job succeeded but carried no usable result reference.
    #[error("unusable result: {0}")]
    ResultFormat(String),

    /// Network, timeout or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller cancelled the poll loop.
    #[error("polling cancelled for job {job_id}")]
    Cancelled { job_id: String },

    /// Local filesystem failure while storing an artifact.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Fieldless mirror of [`JobError`] variants, for matching and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Auth,
    Submission,
    StatusQuery,
    PollTimeout,
    RemoteFailure,
    ResultFormat,
    Transport,
    Cancelled,
    Io,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Configuration(_) => ErrorKind::Configuration,
            JobError::Auth(_) => ErrorKind::Auth,
            JobError::Submission { .. } => ErrorKind::Submission,
            JobError::StatusQuery { .. } => ErrorKind::StatusQuery,
            JobError::PollTimeout { .. } => ErrorKind::PollTimeout,
            JobError::RemoteFailure { .. } => ErrorKind::RemoteFailure,
            JobError::ResultFormat(_) => ErrorKind::ResultFormat,
            JobError::Transport(_) => ErrorKind::Transport,
            JobError::Cancelled { .. } => ErrorKind::Cancelled,
            JobError::Io(_) => ErrorKind::Io,
        }
    }

    /// Classify a reqwest failure.
    pub(crate) fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            JobError::Transport(format!("{context}: request timed out: {err}"))
        } else {
            JobError::Transport(format!("{context}: {err}"))
        }
    }
}

/// Pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Authentication,
    Submission,
    Polling,
    Fetch,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Configuration => "configuration",
            Stage::Authentication => "authentication",
            Stage::Submission => "submission",
            Stage::Polling => "polling",
            Stage::Fetch => "fetch",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level failure returned by the orchestrator.
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct JobFailure {
    pub stage: Stage,
    /// Set once the remote service has assigned an id.
    pub job_id: Option<String>,
    #[source]
    pub error: JobError,
}

impl JobFailure {
    /// Tag a stage error. Authentication errors are reported under the
    /// authentication stage whichever stage hit them.
    pub fn new(stage: Stage, job_id: Option<String>, error: JobError) -> Self {
        let stage = match error.kind() {
            ErrorKind::Auth => Stage::Authentication,
            ErrorKind::Configuration => Stage::Configuration,
            _ => stage,
        };
        Self {
            stage,
            job_id,
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Whether a caller may retry without risking a duplicate remote job.
    ///
    /// Submission-stage failures mean no job was created. Transport failures
    /// after submission are retried by resuming with the retained job id.
    pub fn is_retryable(&self) -> bool {
        match self.stage {
            Stage::Submission => matches!(
                self.kind(),
                ErrorKind::Submission | ErrorKind::Transport
            ),
            _ => self.kind() == ErrorKind::Transport,
        }
    }
}
