//! Control-plane error types
//!
//! Lookup-level failures are typed so the fact runner can tell a missing
//! resource from a real failure, even though both end up as an empty result.

use reqwest::StatusCode;
use serde_json::Value;

/// An error returned by (or on the way to) the Azure Resource Manager API
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} (status: {}, code: {}, request id: {})",
    .status.map(|s| s.as_u16().to_string()).unwrap_or_else(|| "-".to_string()),
    .code.as_deref().unwrap_or("-"),
    .request_id.as_deref().unwrap_or("-"))]
pub struct CloudError {
    /// HTTP status, absent for transport and decoding failures
    pub status: Option<StatusCode>,
    /// ARM error code (e.g. `ResourceNotFound`)
    pub code: Option<String>,
    pub message: String,
    /// Server-assigned `x-ms-request-id`
    pub request_id: Option<String>,
}

impl CloudError {
    /// Build an error from a non-success ARM response.
    ///
    /// ARM wraps errors as `{"error": {"code": "...", "message": "..."}}`; bodies
    /// that don't follow that shape fall back to the canonical status reason.
    pub fn from_response(status: StatusCode, body: &str, request_id: Option<String>) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error = parsed.as_ref().and_then(|v| v.get("error"));

        let code = error
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let message = error
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                format!(
                    "API request failed: {}",
                    status.canonical_reason().unwrap_or("unknown status")
                )
            });

        Self {
            status: Some(status),
            code,
            message,
            request_id,
        }
    }

    /// A failure before any HTTP status was available
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(StatusCode::NOT_FOUND)
    }
}

/// Result of a single lookup against the control plane
#[derive(Debug, Clone)]
pub enum LookupOutcome<T = Value> {
    Found(T),
    NotFound,
    Failed(CloudError),
}

impl<T> From<Result<T, CloudError>> for LookupOutcome<T> {
    fn from(result: Result<T, CloudError>) -> Self {
        match result {
            Ok(value) => LookupOutcome::Found(value),
            Err(e) if e.is_not_found() => LookupOutcome::NotFound,
            Err(e) => LookupOutcome::Failed(e),
        }
    }
}
