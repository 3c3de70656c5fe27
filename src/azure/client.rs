//! Azure management client
//!
//! Combines credentials and HTTP into the per-invocation client every
//! fact lookup goes through.

use super::auth::{AzureCredentials, SubscriptionContext};
use super::error::CloudError;
use super::http::AzureHttpClient;
use anyhow::{Context, Result};
use reqwest::Method;
use serde_json::Value;
use url::Url;

/// Upper bound on followed `nextLink`s, guards against a server looping
const MAX_PAGES: usize = 1000;

/// Management client for one subscription
#[derive(Clone)]
pub struct AzureClient {
    pub credentials: AzureCredentials,
    pub http: AzureHttpClient,
    pub subscription_id: String,
    pub resource_manager: Url,
}

impl AzureClient {
    /// Create a client and acquire its first token.
    ///
    /// Fails when the HTTP client can't be built or no token can be obtained.
    pub async fn new(ctx: &SubscriptionContext) -> Result<Self> {
        let http = AzureHttpClient::new()?;
        let credentials = AzureCredentials::new(
            ctx.token_source.clone(),
            ctx.cloud.clone(),
            http.inner().clone(),
        );

        credentials
            .get_token()
            .await
            .context("Failed to obtain an access token for the management API")?;

        Ok(Self {
            credentials,
            http,
            subscription_id: ctx.subscription_id.clone(),
            resource_manager: ctx.cloud.resource_manager.clone(),
        })
    }

    async fn token(&self) -> Result<String, CloudError> {
        self.credentials
            .get_token()
            .await
            .map_err(|e| CloudError::transport(format!("Failed to get access token: {:#}", e)))
    }

    /// Make a GET request to the management API
    pub async fn get(&self, url: &Url) -> Result<Value, CloudError> {
        let token = self.token().await?;
        self.http.get(url, &token).await
    }

    /// Make a POST request to the management API
    pub async fn post(&self, url: &Url, body: Option<&Value>) -> Result<Value, CloudError> {
        let token = self.token().await?;
        self.http.post(url, &token, body).await
    }

    /// Issue a GET or POST
    pub async fn send(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<Value, CloudError> {
        if *method == Method::POST {
            self.post(url, body).await
        } else {
            self.get(url).await
        }
    }

    /// Fetch every page of a list response and concatenate the items.
    ///
    /// Pages are `{"value": [...], "nextLink": "..."}`; a bare array is a
    /// single complete page and any other object is a one-item list. Only the
    /// first page uses `method`, `nextLink`s are always fetched with GET.
    pub async fn list_all(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<Vec<Value>, CloudError> {
        let mut items = Vec::new();
        let mut next = Some(url.clone());
        let mut pages = 0;

        while let Some(page_url) = next.take() {
            let response = if pages == 0 {
                self.send(method, &page_url, body).await?
            } else {
                self.get(&page_url).await?
            };
            pages += 1;

            match response {
                Value::Array(arr) => items.extend(arr),
                Value::Object(mut map) => match map.remove("value") {
                    Some(Value::Array(arr)) => {
                        items.extend(arr);
                        next = self.next_link(&map)?;
                    }
                    Some(other) => items.push(other),
                    None => items.push(Value::Object(map)),
                },
                Value::Null => {}
                other => items.push(other),
            }

            if pages >= MAX_PAGES && next.is_some() {
                tracing::warn!("Stopped following nextLink after {} pages", MAX_PAGES);
                break;
            }
        }

        tracing::debug!("Fetched {} items in {} pages", items.len(), pages);
        Ok(items)
    }

    /// The page's `nextLink`, only when it stays on the resource manager
    fn next_link(&self, page: &serde_json::Map<String, Value>) -> Result<Option<Url>, CloudError> {
        let Some(link) = page
            .get("nextLink")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        else {
            return Ok(None);
        };

        let url = Url::parse(link)
            .map_err(|e| CloudError::transport(format!("Invalid nextLink: {}", e)))?;
        if url.origin() != self.resource_manager.origin() {
            return Err(CloudError::transport(format!(
                "nextLink points outside the resource manager: {}",
                url.origin().ascii_serialization()
            )));
        }
        Ok(Some(url))
    }

    // =========================================================================
    // Resource Manager URL helpers
    // =========================================================================

    /// Build an ARM URL from a path relative to the resource manager and an api-version
    pub fn arm_url(&self, path: &str, api_version: &str) -> Result<Url, CloudError> {
        let mut url = self
            .resource_manager
            .join(path.trim_start_matches('/'))
            .map_err(|e| {
                CloudError::transport(format!("Invalid request path '{}': {}", path, e))
            })?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// Path of the current subscription
    pub fn subscription_path(&self) -> String {
        format!("/subscriptions/{}", urlencoding::encode(&self.subscription_id))
    }

    /// Path of a resource group in the current subscription
    pub fn resource_group_path(&self, resource_group: &str) -> String {
        format!(
            "{}/resourceGroups/{}",
            self.subscription_path(),
            urlencoding::encode(resource_group)
        )
    }
}
