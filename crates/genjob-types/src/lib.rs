use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────── Job Status ────────────────────

/// Canonical job status shared by every vendor.
///
/// Vendors report their own vocabulary ("succeed", "starting", "canceled", ...);
/// each vendor protocol maps it onto these states. `TimedOut` is never reported
/// by a remote service: the poller synthesizes it locally when the per-class
/// timeout elapses while the job is still running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted by the remote service, not yet started.
    Submitted,
    /// Running remotely.
    Processing,
    /// Finished with a result payload.
    Succeeded,
    /// Finished without a result.
    Failed,
    /// Local give-up; the remote job may still be running.
    TimedOut,
}

impl JobStatus {
    /// Whether no further transition is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── Job Classes ────────────────────

/// Expected-duration bucket of a job, which decides how it is polled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobClass {
    /// Image edits, isolation, style transfer.
    Quick,
    /// Video generation/extension, stem separation, frame interpolation.
    Generation,
    /// Video upscaling.
    VideoUpscale,
}

impl JobClass {
    /// Default poll interval and timeout for this class.
    pub fn default_policy(&self) -> PollPolicy {
        match self {
            JobClass::Quick => PollPolicy::from_secs(3, 300),
            JobClass::Generation => PollPolicy::from_secs(5, 600),
            JobClass::VideoUpscale => PollPolicy::from_secs(10, 1800),
        }
    }
}

/// Fixed-interval polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two status requests.
    pub interval: Duration,
    /// Maximum time since submission before giving up locally.
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_secs(interval_secs: u64, timeout_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }
}

// ──────────────────── Results ────────────────────

/// A downloadable artifact produced by a succeeded job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRef {
    /// Pre-signed or public URL of the artifact.
    pub url: String,
    /// Artifact name (e.g. a stem name such as "vocals").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Media duration in seconds, when the vendor reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Vendor-side identifier of the artifact (reusable in follow-up jobs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ResultRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: None,
            duration: None,
            id: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Shape of the result section of a terminal status response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "refs", rename_all = "snake_case")]
pub enum ResultPayload {
    /// No usable result reference.
    #[default]
    Empty,
    /// One artifact.
    Single(ResultRef),
    /// Several unnamed artifacts, in vendor order.
    List(Vec<ResultRef>),
    /// Named artifacts (every entry carries a label), in vendor order.
    Named(Vec<ResultRef>),
}

impl ResultPayload {
    pub fn refs(&self) -> Vec<&ResultRef> {
        match self {
            ResultPayload::Empty => Vec::new(),
            ResultPayload::Single(r) => vec![r],
            ResultPayload::List(refs) | ResultPayload::Named(refs) => refs.iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.refs().is_empty()
    }
}

/// What to do when a requested named artifact is absent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NamedFallback {
    /// Report a result-format error.
    #[default]
    None,
    /// Take the first entry the vendor returned.
    FirstAvailable,
}

/// Which artifacts the caller wants from a succeeded job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResultSelection {
    /// The single artifact, or the first of a list/mapping.
    #[default]
    First,
    /// Every artifact, written into a destination directory.
    All,
    /// A named artifact from a mapping payload.
    Named {
        name: String,
        #[serde(default)]
        fallback: NamedFallback,
    },
}

impl ResultSelection {
    pub fn named(name: impl Into<String>) -> Self {
        ResultSelection::Named {
            name: name.into(),
            fallback: NamedFallback::None,
        }
    }

    pub fn preferred(name: impl Into<String>) -> Self {
        ResultSelection::Named {
            name: name.into(),
            fallback: NamedFallback::FirstAvailable,
        }
    }
}

// ──────────────────── Jobs ────────────────────

/// Local view of a remote asynchronous job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque identifier assigned by the remote service.
    pub job_id: String,
    /// Vendor name (e.g. "kling", "replicate").
    pub vendor: String,
    /// Vendor endpoint segment the job was created on (e.g. "video-extend").
    pub task_type: String,
    /// Polling class.
    pub class: JobClass,
    /// Last observed status.
    pub status: JobStatus,
    /// When the submission was acknowledged.
    pub submitted_at: DateTime<Utc>,
    /// Number of status requests performed so far.
    #[serde(default)]
    pub poll_count: u32,
    /// Vendor-provided failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Result references from the last status response.
    #[serde(default)]
    pub output: ResultPayload,
    /// Raw body of the last status response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<serde_json::Value>,
}

impl Job {
    /// A freshly submitted job.
    pub fn submitted(
        job_id: impl Into<String>,
        vendor: impl Into<String>,
        task_type: impl Into<String>,
        class: JobClass,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            vendor: vendor.into(),
            task_type: task_type.into(),
            class,
            status: JobStatus::Submitted,
            submitted_at: Utc::now(),
            poll_count: 0,
            failure_reason: None,
            output: ResultPayload::Empty,
            last_response: None,
        }
    }
}

/// A single status check, handed to poll observers and then dropped.
#[derive(Debug, Clone)]
pub struct PollAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    pub at: DateTime<Utc>,
    /// Status string exactly as the vendor sent it.
    pub raw_status: String,
    pub status: JobStatus,
    pub response: serde_json::Value,
}
