//! Job creation: one authenticated request, never retried.

use reqwest::header::AUTHORIZATION;
use reqwest::multipart;
use serde_json::Value;
use tracing::{debug, info};

use genjob_types::{Job, JobClass};

use crate::credential::Credential;
use crate::error::{JobError, Result};
use crate::http::ApiClient;
use crate::vendor::Vendor;

/// Body of a job-creation request. Built by the caller; sent as-is.
#[derive(Debug)]
pub enum RequestBody {
    Json(Value),
    Multipart(multipart::Form),
}

/// A job to create on a vendor endpoint.
#[derive(Debug)]
pub struct JobRequest {
    /// Vendor endpoint segment (e.g. "video-extend", "predictions").
    pub task_type: String,
    pub body: RequestBody,
    /// Decides the poll interval and timeout.
    pub class: JobClass,
}

impl JobRequest {
    pub fn json(task_type: impl Into<String>, class: JobClass, payload: Value) -> Self {
        Self {
            task_type: task_type.into(),
            body: RequestBody::Json(payload),
            class,
        }
    }

    pub fn multipart(task_type: impl Into<String>, class: JobClass, form: multipart::Form) -> Self {
        Self {
            task_type: task_type.into(),
            body: RequestBody::Multipart(form),
            class,
        }
    }
}

/// Sends job-creation requests for one vendor.
pub struct Submitter<'a> {
    vendor: &'a dyn Vendor,
    api: &'a ApiClient,
}

impl<'a> Submitter<'a> {
    pub fn new(vendor: &'a dyn Vendor, api: &'a ApiClient) -> Self {
        Self { vendor, api }
    }

    /// Create the remote job and return it in the `submitted` state.
    ///
    /// Resubmitting creates a duplicate remote job, so failures are returned
    /// to the caller untouched.
    pub async fn submit(&self, request: JobRequest, credential: &mut Credential) -> Result<Job> {
        credential.refresh_if_needed(self.api.request_timeout())?;

        let url = self.vendor.submit_url(&request.task_type);
        debug!(vendor = self.vendor.name(), %url, "Submitting job");

        let builder = self
            .api
            .post(&url)
            .header(AUTHORIZATION, credential.header_value());
        let builder = match request.body {
            RequestBody::Json(payload) => builder.json(&payload),
            RequestBody::Multipart(form) => builder.multipart(form),
        };

        let reply = self.api.execute(builder, "submit request").await?;

        if reply.is_auth_rejection() {
            return Err(JobError::Auth(format!(
                "{} rejected credentials ({}): {}",
                self.vendor.name(),
                reply.status.as_u16(),
                reply.error_message(self.vendor)
            )));
        }
        if !reply.status.is_success() {
            return Err(JobError::Submission {
                status: Some(reply.status.as_u16()),
                message: reply.error_message(self.vendor),
            });
        }

        let json = reply.json.as_ref().ok_or_else(|| JobError::Submission {
            status: Some(reply.status.as_u16()),
            message: format!("response is not JSON: {}", reply.error_message(self.vendor)),
        })?;
        let job_id = self
            .vendor
            .parse_submission(json)
            .map_err(|message| JobError::Submission {
                status: Some(reply.status.as_u16()),
                message,
            })?;

        info!(vendor = self.vendor.name(), job_id = %job_id, task_type = %request.task_type, "Job submitted");

        Ok(Job::submitted(
            job_id,
            self.vendor.name(),
            request.task_type,
            request.class,
        ))
    }
}
