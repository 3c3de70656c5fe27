//! HTTP utilities for Azure Resource Manager REST calls

use super::error::CloudError;
use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

const USER_AGENT: &str = concat!("azfacts/", env!("CARGO_PKG_VERSION"));

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for ARM API calls
#[derive(Clone)]
pub struct AzureHttpClient {
    client: Client,
}

impl AzureHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// The underlying client, shared with the token acquisition
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Make a GET request to an ARM API
    pub async fn get(&self, url: &Url, token: &str) -> Result<Value, CloudError> {
        tracing::debug!("GET {}", url);
        let request = self.client.request(Method::GET, url.clone());
        self.send(request, token).await
    }

    /// Make a POST request to an ARM API (read-only list actions)
    pub async fn post(
        &self,
        url: &Url,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value, CloudError> {
        tracing::debug!("POST {}", url);
        let mut request = self.client.request(Method::POST, url.clone());
        request = match body {
            Some(body) => request.json(body),
            None => request.header(reqwest::header::CONTENT_LENGTH, 0),
        };
        self.send(request, token).await
    }

    async fn send(&self, request: RequestBuilder, token: &str) -> Result<Value, CloudError> {
        let client_request_id = uuid::Uuid::new_v4().to_string();

        let response = request
            .bearer_auth(token)
            .header("x-ms-client-request-id", &client_request_id)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| CloudError::transport(format!("Failed to send request: {}", e)))?;

        read_response(response, &client_request_id).await
    }
}

async fn read_response(response: Response, client_request_id: &str) -> Result<Value, CloudError> {
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-ms-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let body = response
        .text()
        .await
        .map_err(|e| CloudError::transport(format!("Failed to read response body: {}", e)))?;

    if !status.is_success() {
        tracing::debug!(
            "API error: {} (client request id {}) - {}",
            status,
            client_request_id,
            sanitize_for_log(&body)
        );
        return Err(CloudError::from_response(status, &body, request_id));
    }

    // Handle empty response
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(|e| CloudError {
        status: Some(status),
        code: None,
        message: format!("Failed to parse response JSON: {}", e),
        request_id,
    })
}

/// Format a cloud error for the envelope's warnings.
/// Keeps the message short and free of response bodies.
pub fn format_cloud_error(error: &CloudError) -> String {
    let summary = match error.status.map(|s| s.as_u16()) {
        Some(401) => "Authentication failed. Check the configured credentials.".to_string(),
        Some(403) => "Permission denied. Check the role assignments of the principal.".to_string(),
        Some(404) => "Resource not found.".to_string(),
        Some(429) => "Request throttled by the control plane.".to_string(),
        Some(s) if s >= 500 => "Azure service temporarily unavailable.".to_string(),
        _ => {
            let sanitized: String = error
                .message
                .chars()
                .filter(|c| c.is_ascii_graphic() || *c == ' ')
                .take(120)
                .collect();
            if sanitized.len() < error.message.len() {
                format!("{}...", sanitized)
            } else {
                sanitized
            }
        }
    };

    match &error.request_id {
        Some(id) => format!("{} (request id: {})", summary, id),
        None => summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
    }

    #[test]
    fn test_sanitize_respects_char_boundaries() {
        let body = "é".repeat(150);
        // Must not panic on a multi-byte boundary
        let _ = sanitize_for_log(&body);
    }

    #[test]
    fn test_format_cloud_error_by_status() {
        let forbidden = CloudError::from_response(StatusCode::FORBIDDEN, "", Some("r-1".into()));
        assert_eq!(
            format_cloud_error(&forbidden),
            "Permission denied. Check the role assignments of the principal. (request id: r-1)"
        );

        let transport = CloudError::transport("connection refused");
        assert_eq!(format_cloud_error(&transport), "connection refused");
    }
}
