//! Azure Resource Manager access
//!
//! The thin control-plane layer the fact runner calls into: cloud
//! environments, credential discovery, HTTP and the management client.
//!
//! # Module Structure
//!
//! - [`cloud`] - Sovereign cloud endpoints
//! - [`auth`] - Credential discovery and token acquisition
//! - [`http`] - HTTP utilities for REST API calls
//! - [`client`] - Management client used by every lookup
//! - [`error`] - Lookup-level error types
//!
//! # Example
//!
//! ```ignore
//! use azfacts::azure::{auth, client::AzureClient};
//!
//! async fn example(settings: &auth::CredentialSettings) -> anyhow::Result<()> {
//!     let ctx = auth::resolve(settings).await?;
//!     let client = AzureClient::new(&ctx).await?;
//!     let url = client.arm_url(&client.subscription_path(), "2021-04-01")?;
//!     let subscription = client.get(&url).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod cloud;
pub mod error;
pub mod http;
