//! Azure cloud environments
//!
//! Each sovereign cloud has its own resource-manager endpoint and login
//! authority. A literal `https://` URL selects a custom resource manager that
//! authenticates against the public authority.

use anyhow::{Context, Result};
use url::Url;

/// Endpoints of one Azure cloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEnvironment {
    pub name: String,
    /// Resource Manager base URL, always with a trailing slash
    pub resource_manager: Url,
    /// Login authority host (`https://login.microsoftonline.com/`)
    pub authority_host: Url,
    /// Token audience for the management API
    pub token_audience: String,
}

/// (name, resource manager, authority host, token audience)
const KNOWN_CLOUDS: &[(&str, &str, &str, &str)] = &[
    (
        "AzureCloud",
        "https://management.azure.com/",
        "https://login.microsoftonline.com/",
        "https://management.core.windows.net/",
    ),
    (
        "AzureChinaCloud",
        "https://management.chinacloudapi.cn/",
        "https://login.chinacloudapi.cn/",
        "https://management.core.chinacloudapi.cn/",
    ),
    (
        "AzureUSGovernment",
        "https://management.usgovcloudapi.net/",
        "https://login.microsoftonline.us/",
        "https://management.core.usgovcloudapi.net/",
    ),
    (
        "AzureGermanCloud",
        "https://management.microsoftazure.de/",
        "https://login.microsoftonline.de/",
        "https://management.core.cloudapi.de/",
    ),
];

pub const DEFAULT_CLOUD: &str = "AzureCloud";

impl CloudEnvironment {
    /// Resolve a cloud by name (case-insensitive) or by resource-manager URL
    pub fn resolve(name_or_url: &str) -> Result<Self> {
        let trimmed = name_or_url.trim();

        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            let (_, _, authority, audience) = KNOWN_CLOUDS[0];
            return Self::build("Custom", trimmed, authority, audience);
        }

        let Some(&(name, rm, authority, audience)) = KNOWN_CLOUDS
            .iter()
            .find(|(n, ..)| n.eq_ignore_ascii_case(trimmed))
        else {
            let known: Vec<&str> = KNOWN_CLOUDS.iter().map(|(n, ..)| *n).collect();
            return Err(anyhow::anyhow!(
                "Unknown cloud environment '{}'. Expected one of: {} or a resource manager URL",
                trimmed,
                known.join(", ")
            ));
        };

        Self::build(name, rm, authority, audience)
    }

    /// Build a custom environment, used to point every endpoint at one host
    pub fn custom(
        resource_manager: &str,
        authority_host: &str,
        token_audience: &str,
    ) -> Result<Self> {
        Self::build("Custom", resource_manager, authority_host, token_audience)
    }

    fn build(name: &str, rm: &str, authority: &str, audience: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            resource_manager: parse_base(rm).context("Invalid resource manager URL")?,
            authority_host: parse_base(authority).context("Invalid authority host URL")?,
            token_audience: audience.to_string(),
        })
    }

    /// OAuth2 scope for the management API (`<audience>/.default`)
    pub fn management_scope(&self) -> String {
        format!("{}/.default", self.token_audience.trim_end_matches('/'))
    }
}

/// Parse a base URL, making sure it ends with `/` so `Url::join` appends
fn parse_base(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Ok(Url::parse(&with_slash)?)
}
