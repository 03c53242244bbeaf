//! Shared HTTP plumbing for vendor API calls.

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use crate::error::{JobError, Result};
use crate::vendor::Vendor;

/// Raw bodies quoted in errors are cut to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// HTTP client for submit and status requests, with a per-request timeout.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("genjob/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| JobError::Configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            request_timeout,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Send a request and read the whole body.
    pub(crate) async fn execute(&self, request: RequestBuilder, context: &str) -> Result<ApiReply> {
        let resp = request
            .send()
            .await
            .map_err(|e| JobError::from_reqwest(context, e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| JobError::from_reqwest(context, e))?;
        let json = serde_json::from_str(&body).ok();
        Ok(ApiReply { status, body, json })
    }
}

/// A fully-read API response.
#[derive(Debug)]
pub(crate) struct ApiReply {
    pub status: StatusCode,
    pub body: String,
    /// Parsed body, when it is valid JSON.
    pub json: Option<Value>,
}

impl ApiReply {
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
    }

    /// Vendor error message, falling back to the (truncated) raw body.
    pub fn error_message(&self, vendor: &dyn Vendor) -> String {
        if let Some(msg) = self.json.as_ref().and_then(|j| vendor.error_message(j)) {
            return msg;
        }
        let truncated: String = self.body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
        if truncated.is_empty() {
            self.status
                .canonical_reason()
                .unwrap_or("empty response body")
                .to_string()
        } else {
            truncated
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::vendor::ReplicateVendor;

    fn reply(status: StatusCode, body: &str) -> ApiReply {
        ApiReply {
            status,
            body: body.to_string(),
            json: serde_json::from_str(body).ok(),
        }
    }

    #[test]
    fn test_error_message_from_known_field() {
        let vendor = ReplicateVendor::new();
        let body = json!({"detail": "Invalid version", "status": 422}).to_string();
        let r = reply(StatusCode::UNPROCESSABLE_ENTITY, &body);
        assert_eq!(r.error_message(&vendor), "Invalid version");
    }

    #[test]
    fn test_error_message_falls_back_to_raw_body() {
        let vendor = ReplicateVendor::new();
        let r = reply(StatusCode::BAD_GATEWAY, "<html>Bad Gateway</html>");
        assert_eq!(r.error_message(&vendor), "<html>Bad Gateway</html>");

        let r = reply(StatusCode::BAD_REQUEST, r#"{"unexpected": true}"#);
        assert_eq!(r.error_message(&vendor), r#"{"unexpected": true}"#);

        let r = reply(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(r.error_message(&vendor), "Service Unavailable");

        let long = "x".repeat(2000);
        let r = reply(StatusCode::INTERNAL_SERVER_ERROR, &long);
        assert_eq!(r.error_message(&vendor).len(), MAX_ERROR_BODY_CHARS);
    }

    #[test]
    fn test_auth_rejection() {
        assert!(reply(StatusCode::UNAUTHORIZED, "").is_auth_rejection());
        assert!(reply(StatusCode::FORBIDDEN, "").is_auth_rejection());
        assert!(!reply(StatusCode::NOT_FOUND, "").is_auth_rejection());
    }
}
