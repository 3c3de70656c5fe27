//! Azure Authentication
//!
//! Discovers credentials the way the host runtime's Azure modules do (module
//! arguments, environment, `~/.azure/credentials`, Azure CLI, managed
//! identity) and acquires bearer tokens for the management API.

use super::cloud::{CloudEnvironment, DEFAULT_CLOUD};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Token expiry buffer (seconds) - refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;

/// Default token TTL (seconds) if the token endpoint doesn't say
const DEFAULT_TOKEN_TTL_SECS: i64 = 30 * 60;

/// Instance metadata service token endpoint
const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Where credentials are taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthSource {
    #[default]
    Auto,
    CredentialFile,
    Env,
    Cli,
    Msi,
}

impl FromStr for AuthSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "credential_file" => Ok(Self::CredentialFile),
            "env" => Ok(Self::Env),
            "cli" => Ok(Self::Cli),
            "msi" => Ok(Self::Msi),
            other => Err(anyhow::anyhow!(
                "value of auth_source must be one of: {}, got: {}",
                "auto, cli, credential_file, env, msi",
                other
            )),
        }
    }
}

/// Credential-related values as supplied by one layer (args, env, file)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialFields {
    pub subscription_id: Option<String>,
    pub client_id: Option<String>,
    pub secret: Option<String>,
    pub tenant: Option<String>,
    pub cloud_environment: Option<String>,
}

impl CredentialFields {
    fn service_principal(&self) -> Option<TokenSource> {
        match (&self.client_id, &self.secret, &self.tenant) {
            (Some(client_id), Some(secret), Some(tenant)) => Some(TokenSource::ServicePrincipal {
                tenant: tenant.clone(),
                client_id: client_id.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        }
    }

    /// Read the standard `AZURE_*` variables
    pub fn from_env(env: &dyn Fn(&str) -> Option<String>) -> Self {
        let first = |names: &[&str]| names.iter().find_map(|n| env(n).filter(|v| !v.is_empty()));
        Self {
            subscription_id: first(&["AZURE_SUBSCRIPTION_ID"]),
            client_id: first(&["AZURE_CLIENT_ID"]),
            secret: first(&["AZURE_SECRET", "AZURE_CLIENT_SECRET"]),
            tenant: first(&["AZURE_TENANT", "AZURE_TENANT_ID"]),
            cloud_environment: first(&["AZURE_CLOUD_ENVIRONMENT"]),
        }
    }

    /// Read one profile section of an `~/.azure/credentials` file
    pub fn from_credentials_file(content: &str, profile: &str) -> Option<Self> {
        let section = parse_credentials_file(content).remove(profile)?;
        let get = |key: &str| section.get(key).filter(|v| !v.is_empty()).cloned();
        Some(Self {
            subscription_id: get("subscription_id"),
            client_id: get("client_id"),
            secret: get("secret"),
            tenant: get("tenant"),
            cloud_environment: get("cloud_environment"),
        })
    }
}

/// Everything needed to resolve a subscription context
#[derive(Debug, Clone, Default)]
pub struct CredentialSettings {
    pub auth_source: AuthSource,
    pub profile: Option<String>,
    /// Values given as module arguments
    pub explicit: CredentialFields,
    /// Pre-acquired bearer token
    pub access_token: Option<String>,
    /// Fallback cloud from the user configuration
    pub default_cloud: Option<String>,
}

/// How bearer tokens are obtained
#[derive(Clone, PartialEq, Eq)]
pub enum TokenSource {
    ServicePrincipal {
        tenant: String,
        client_id: String,
        secret: String,
    },
    Cli,
    ManagedIdentity {
        client_id: Option<String>,
    },
    Static(String),
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secrets or tokens
        match self {
            Self::ServicePrincipal { tenant, client_id, .. } => f
                .debug_struct("ServicePrincipal")
                .field("tenant", tenant)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            Self::Cli => write!(f, "Cli"),
            Self::ManagedIdentity { client_id } => f
                .debug_struct("ManagedIdentity")
                .field("client_id", client_id)
                .finish(),
            Self::Static(_) => write!(f, "Static"),
        }
    }
}

/// Resolved subscription context threaded through every invocation
#[derive(Debug, Clone)]
pub struct SubscriptionContext {
    pub subscription_id: String,
    pub cloud: CloudEnvironment,
    pub token_source: TokenSource,
}

/// Resolve credentials from the process environment and the user's files
pub async fn resolve(settings: &CredentialSettings) -> Result<SubscriptionContext> {
    let env = |name: &str| std::env::var(name).ok();
    let file = credentials_file_path().and_then(|p| std::fs::read_to_string(p).ok());
    resolve_with(settings, &env, file.as_deref()).await
}

/// Resolve credentials from explicit sources.
///
/// Precedence is explicit arguments, then environment, then the credentials
/// file profile, then the Azure CLI. A non-`auto` `auth_source` pins one source.
pub async fn resolve_with(
    settings: &CredentialSettings,
    env: &dyn Fn(&str) -> Option<String>,
    credentials_file: Option<&str>,
) -> Result<SubscriptionContext> {
    let env_fields = CredentialFields::from_env(env);
    let profile = settings
        .profile
        .clone()
        .or_else(|| env("AZURE_PROFILE"))
        .unwrap_or_else(|| "default".to_string());
    let file_fields = credentials_file
        .and_then(|content| CredentialFields::from_credentials_file(content, &profile));

    if settings.auth_source == AuthSource::CredentialFile && file_fields.is_none() {
        return Err(anyhow::anyhow!(
            "Failed to find profile '{}' in the Azure credentials file",
            profile
        ));
    }

    let layers: Vec<&CredentialFields> = match settings.auth_source {
        AuthSource::Auto => std::iter::once(&settings.explicit)
            .chain(std::iter::once(&env_fields))
            .chain(file_fields.as_ref())
            .collect(),
        AuthSource::Env => vec![&settings.explicit, &env_fields],
        AuthSource::CredentialFile => {
            std::iter::once(&settings.explicit).chain(file_fields.as_ref()).collect()
        }
        AuthSource::Cli | AuthSource::Msi => vec![&settings.explicit, &env_fields],
    };

    let cloud_name = pick(&layers, |l| l.cloud_environment.clone())
        .or_else(|| settings.default_cloud.clone())
        .unwrap_or_else(|| DEFAULT_CLOUD.to_string());
    let cloud = CloudEnvironment::resolve(&cloud_name)?;

    let access_token = settings
        .access_token
        .clone()
        .or_else(|| env("AZURE_ACCESS_TOKEN"))
        .filter(|t| !t.is_empty());

    let token_source = if let Some(token) = access_token {
        TokenSource::Static(token)
    } else {
        match settings.auth_source {
            AuthSource::Cli => TokenSource::Cli,
            AuthSource::Msi => TokenSource::ManagedIdentity {
                client_id: settings.explicit.client_id.clone(),
            },
            AuthSource::Auto => layers
                .iter()
                .find_map(|layer| layer.service_principal())
                .unwrap_or(TokenSource::Cli),
            AuthSource::Env | AuthSource::CredentialFile => layers
                .iter()
                .find_map(|layer| layer.service_principal())
                .context(
                    "Failed to get credentials. Either pass client_id, secret and tenant as \
                     parameters, set AZURE_CLIENT_ID, AZURE_SECRET and AZURE_TENANT, or define \
                     them in a credentials profile",
                )?,
        }
    };

    let subscription_id = match pick(&layers, |l| l.subscription_id.clone()) {
        Some(id) => id,
        None if token_source == TokenSource::Cli => cli_default_subscription().await?,
        None => {
            return Err(anyhow::anyhow!(
                "Failed to get subscription id. Pass subscription_id or set AZURE_SUBSCRIPTION_ID"
            ))
        }
    };

    tracing::info!(
        "Resolved credentials: cloud={}, source={:?}, subscription={}",
        cloud.name,
        token_source,
        subscription_id
    );

    Ok(SubscriptionContext {
        subscription_id,
        cloud,
        token_source,
    })
}

/// First layer that has a value for a field
fn pick(
    layers: &[&CredentialFields],
    field: impl Fn(&CredentialFields) -> Option<String>,
) -> Option<String> {
    layers.iter().find_map(|layer| field(layer))
}

/// Path of the Azure credentials file
pub fn credentials_file_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".azure").join("credentials"))
}

/// Parse an INI-style credentials file into `section -> key -> value`
pub fn parse_credentials_file(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        let Some(section) = current.as_ref() else {
            continue;
        };
        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    sections
}

async fn cli_default_subscription() -> Result<String> {
    #[derive(Deserialize)]
    struct Account {
        id: String,
    }

    let output = tokio::process::Command::new("az")
        .args(["account", "show", "--output", "json"])
        .output()
        .await
        .context("Failed to run 'az account show'. Is the Azure CLI installed?")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "Azure CLI has no default subscription. Run 'az login' or pass subscription_id"
        ));
    }

    let account: Account = serde_json::from_slice(&output.stdout)
        .context("Failed to parse 'az account show' output")?;
    Ok(account.id)
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Azure credentials holder with token caching
#[derive(Clone)]
pub struct AzureCredentials {
    source: TokenSource,
    cloud: CloudEnvironment,
    http: reqwest::Client,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    /// Seconds; the instance metadata service sends it as a string
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
}

impl AzureCredentials {
    pub fn new(source: TokenSource, cloud: CloudEnvironment, http: reqwest::Client) -> Self {
        Self {
            source,
            cloud,
            http,
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Get an access token for API calls
    pub async fn get_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let (token, ttl) = self.acquire().await?;
        let expires_at = Utc::now() + ttl - Duration::seconds(TOKEN_EXPIRY_BUFFER_SECS);

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token.clone(),
                expires_at,
            });
        }

        tracing::debug!("New token cached, expires at {}", expires_at);
        Ok(token)
    }

    async fn acquire(&self) -> Result<(String, Duration)> {
        match &self.source {
            TokenSource::Static(token) => Ok((token.clone(), Duration::days(365))),
            TokenSource::ServicePrincipal {
                tenant,
                client_id,
                secret,
            } => self.acquire_client_credentials(tenant, client_id, secret).await,
            TokenSource::ManagedIdentity { client_id } => {
                self.acquire_managed_identity(client_id.as_deref()).await
            }
            TokenSource::Cli => self.acquire_cli().await,
        }
    }

    async fn acquire_client_credentials(
        &self,
        tenant: &str,
        client_id: &str,
        secret: &str,
    ) -> Result<(String, Duration)> {
        let url = self
            .cloud
            .authority_host
            .join(&format!("{}/oauth2/v2.0/token", urlencoding::encode(tenant)))
            .context("Invalid tenant for token endpoint")?;
        let scope = self.cloud.management_scope();
        let params = [
            ("client_id", client_id),
            ("client_secret", secret),
            ("scope", scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        tracing::debug!("POST {} (client credentials)", url);
        let response = self
            .http
            .post(url)
            .form(&params)
            .send()
            .await
            .context("Failed to request access token")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "Token endpoint rejected the service principal credentials: {}",
                status
            ));
        }

        let payload: OAuthTokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;
        Ok((payload.access_token, ttl_from(payload.expires_in.as_ref())))
    }

    async fn acquire_managed_identity(
        &self,
        client_id: Option<&str>,
    ) -> Result<(String, Duration)> {
        let mut query = vec![
            ("api-version", "2018-02-01"),
            ("resource", self.cloud.token_audience.as_str()),
        ];
        if let Some(id) = client_id {
            query.push(("client_id", id));
        }

        let response = self
            .http
            .get(IMDS_TOKEN_ENDPOINT)
            .header("Metadata", "true")
            .query(&query)
            .send()
            .await
            .context("Failed to reach the instance metadata service for a managed identity token")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("Managed identity token request failed: {}", status));
        }

        let payload: OAuthTokenResponse = response
            .json()
            .await
            .context("Failed to parse managed identity token response")?;
        Ok((payload.access_token, ttl_from(payload.expires_in.as_ref())))
    }

    async fn acquire_cli(&self) -> Result<(String, Duration)> {
        let output = tokio::process::Command::new("az")
            .args([
                "account",
                "get-access-token",
                "--resource",
                self.cloud.token_audience.as_str(),
                "--output",
                "json",
            ])
            .output()
            .await
            .context("Failed to run 'az account get-access-token'. Is the Azure CLI installed?")?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "Azure CLI could not provide a token. Run 'az login'"
            ));
        }

        let payload: CliTokenResponse = serde_json::from_slice(&output.stdout)
            .context("Failed to parse 'az account get-access-token' output")?;
        let ttl = payload
            .expires_on
            .as_deref()
            .and_then(parse_cli_expiry)
            .map(|at| at - Utc::now())
            .unwrap_or_else(|| Duration::seconds(DEFAULT_TOKEN_TTL_SECS));
        Ok((payload.access_token, ttl))
    }
}

fn ttl_from(expires_in: Option<&serde_json::Value>) -> Duration {
    let seconds = match expires_in {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    Duration::seconds(seconds.unwrap_or(DEFAULT_TOKEN_TTL_SECS))
}

/// Parse the CLI's `expiresOn` (local time, `2024-01-01 12:00:00.000000`)
fn parse_cli_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREDENTIALS: &str = "\
# service principals
[default]
subscription_id = sub-default
client_id = app-default
secret = s3cret
tenant = tenant-default

[staging]
subscription_id=sub-staging
cloud_environment=AzureUSGovernment
";

    fn env_from(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_parse_credentials_file_sections() {
        let sections = parse_credentials_file(CREDENTIALS);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections["default"]["client_id"], "app-default");
        assert_eq!(sections["staging"]["subscription_id"], "sub-staging");
    }

    #[test]
    fn test_auth_source_parse() {
        assert_eq!("".parse::<AuthSource>().unwrap(), AuthSource::Auto);
        assert_eq!("MSI".parse::<AuthSource>().unwrap(), AuthSource::Msi);
        assert!("kerberos".parse::<AuthSource>().is_err());
    }

    #[tokio::test]
    async fn test_explicit_arguments_win_over_env() {
        let settings = CredentialSettings {
            explicit: CredentialFields {
                subscription_id: Some("sub-arg".into()),
                client_id: Some("app-arg".into()),
                secret: Some("pw".into()),
                tenant: Some("tenant-arg".into()),
                cloud_environment: None,
            },
            ..Default::default()
        };
        let env = env_from(&[
            ("AZURE_SUBSCRIPTION_ID", "sub-env"),
            ("AZURE_CLIENT_ID", "app-env"),
            ("AZURE_SECRET", "pw-env"),
            ("AZURE_TENANT", "tenant-env"),
        ]);

        let ctx = resolve_with(&settings, &env, None).await.unwrap();
        assert_eq!(ctx.subscription_id, "sub-arg");
        assert!(matches!(
            ctx.token_source,
            TokenSource::ServicePrincipal { ref client_id, .. } if client_id == "app-arg"
        ));
    }

    #[tokio::test]
    async fn test_credentials_file_profile() {
        let settings = CredentialSettings {
            auth_source: AuthSource::CredentialFile,
            ..Default::default()
        };
        let env = env_from(&[]);

        let ctx = resolve_with(&settings, &env, Some(CREDENTIALS)).await.unwrap();
        assert_eq!(ctx.subscription_id, "sub-default");
        assert_eq!(ctx.cloud.name, "AzureCloud");
    }

    #[tokio::test]
    async fn test_missing_profile_is_fatal() {
        let settings = CredentialSettings {
            auth_source: AuthSource::CredentialFile,
            profile: Some("prod".into()),
            ..Default::default()
        };
        let env = env_from(&[]);

        let err = resolve_with(&settings, &env, Some(CREDENTIALS)).await.unwrap_err();
        assert!(err.to_string().contains("prod"));
    }

    #[tokio::test]
    async fn test_env_source_without_service_principal_fails() {
        let settings = CredentialSettings {
            auth_source: AuthSource::Env,
            ..Default::default()
        };
        let env = env_from(&[("AZURE_SUBSCRIPTION_ID", "sub-env")]);

        assert!(resolve_with(&settings, &env, None).await.is_err());
    }

    #[tokio::test]
    async fn test_access_token_with_subscription() {
        let settings = CredentialSettings {
            access_token: Some("tok".into()),
            ..Default::default()
        };
        let env = env_from(&[
            ("AZURE_SUBSCRIPTION_ID", "sub-env"),
            ("AZURE_CLOUD_ENVIRONMENT", "AzureChinaCloud"),
        ]);

        let ctx = resolve_with(&settings, &env, None).await.unwrap();
        assert_eq!(ctx.token_source, TokenSource::Static("tok".into()));
        assert_eq!(ctx.cloud.name, "AzureChinaCloud");
    }

    #[tokio::test]
    async fn test_msi_without_subscription_is_fatal() {
        let settings = CredentialSettings {
            auth_source: AuthSource::Msi,
            ..Default::default()
        };
        let env = env_from(&[]);

        let err = resolve_with(&settings, &env, None).await.unwrap_err();
        assert!(err.to_string().contains("subscription"));
    }

    #[test]
    fn test_debug_hides_secret() {
        let source = TokenSource::ServicePrincipal {
            tenant: "t".into(),
            client_id: "c".into(),
            secret: "hunter2".into(),
        };
        assert!(!format!("{:?}", source).contains("hunter2"));
        assert!(!format!("{:?}", TokenSource::Static("tok".into())).contains("tok"));
    }

    #[test]
    fn test_ttl_from_number_and_string() {
        assert_eq!(ttl_from(Some(&serde_json::json!(3599))), Duration::seconds(3599));
        assert_eq!(ttl_from(Some(&serde_json::json!("120"))), Duration::seconds(120));
        assert_eq!(ttl_from(None), Duration::seconds(DEFAULT_TOKEN_TTL_SECS));
    }

    #[test]
    fn test_parse_cli_expiry() {
        assert!(parse_cli_expiry("2030-01-01 12:00:00.000000").is_some());
        assert!(parse_cli_expiry("not a date").is_none());
    }

    #[test]
    fn test_static_token_is_cached() {
        let cloud = CloudEnvironment::resolve(DEFAULT_CLOUD).unwrap();
        let creds = AzureCredentials::new(
            TokenSource::Static("abc".into()),
            cloud,
            reqwest::Client::new(),
        );
        let token = tokio_test::block_on(creds.get_token()).unwrap();
        assert_eq!(token, "abc");
    }
}
