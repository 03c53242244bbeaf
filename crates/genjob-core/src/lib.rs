//! Asynchronous remote-job orchestration.
//!
//! A job is submitted once, polled at a fixed interval until it settles, and
//! its result artifacts are streamed to local files. Vendor protocols plug in
//! through [`vendor::Vendor`].

pub mod credential;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod orchestrator;
pub mod poller;
pub mod submitter;
pub mod vendor;

#[cfg(test)]
mod test_support;

pub use credential::{Credential, JwtSigner};
pub use error::{ErrorKind, JobError, JobFailure, Stage};
pub use fetcher::{Artifact, ResultFetcher};
pub use http::ApiClient;
pub use orchestrator::{JobHandle, JobOutcome, Orchestrator};
pub use poller::{PollObserver, Poller};
pub use submitter::{JobRequest, RequestBody, Submitter};
pub use vendor::{KlingVendor, ReplicateVendor, Vendor};
