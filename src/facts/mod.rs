//! Fact modules
//!
//! Every module is the same template parameterized by a descriptor:
//!
//! - [`args`] - Argument validation and binding
//! - [`runner`] - Lookup selection and execution
//! - [`envelope`] - Result envelope for the host runtime

pub mod args;
pub mod envelope;
pub mod runner;

use crate::azure::auth;
use crate::azure::auth::SubscriptionContext;
use crate::resource::{get_registry, ResourceCatalog, ResourceDescriptor};
use args::Invocation;
use envelope::Envelope;
use serde_json::Value;

/// Settings from outside the argument bag (command line, config file)
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub access_token: Option<String>,
    pub default_profile: Option<String>,
    pub default_cloud: Option<String>,
}

/// Look up a module and bind its arguments, or produce the failure envelope
pub fn prepare_invocation<'a>(
    catalog: &'a ResourceCatalog,
    module_name: &str,
    raw_args: &Value,
) -> Result<(&'a ResourceDescriptor, Invocation), Box<Envelope>> {
    let descriptor = catalog.get(module_name).ok_or_else(|| {
        Box::new(Envelope::failure(format!("Unknown fact module '{}'", module_name)))
    })?;

    let invocation = args::bind(descriptor, raw_args).map_err(|e| {
        tracing::error!("{}: {}", module_name, e);
        Box::new(Envelope::failure(e.to_string()))
    })?;

    Ok((descriptor, invocation))
}

/// Run a bound invocation. The envelope depends only on what the selected
/// lookups returned, never on the arguments themselves.
pub async fn execute(
    catalog: &ResourceCatalog,
    descriptor: &ResourceDescriptor,
    invocation: &Invocation,
    ctx: &SubscriptionContext,
) -> Envelope {
    tracing::debug!(
        "{} arguments: {}",
        descriptor.module_name,
        serde_json::Value::Object(invocation.module_args.clone())
    );

    match runner::run(catalog, descriptor, invocation, ctx).await {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!("{}: {:#}", descriptor.module_name, e);
            Envelope::failure(format!("{:#}", e))
        }
    }
}

/// Run a fact module end to end: bind, resolve credentials, execute
pub async fn run_module(module_name: &str, raw_args: &Value, options: &RunOptions) -> Envelope {
    let catalog = match get_registry() {
        Ok(catalog) => catalog,
        Err(e) => return Envelope::failure(format!("{:#}", e)),
    };

    let (descriptor, invocation) = match prepare_invocation(catalog, module_name, raw_args) {
        Ok(prepared) => prepared,
        Err(failure) => return *failure,
    };

    let mut settings = invocation.common.credentials.clone();
    settings.access_token = options.access_token.clone();
    settings.default_cloud = options.default_cloud.clone();
    if settings.profile.is_none() {
        settings.profile = options.default_profile.clone();
    }

    let ctx = match auth::resolve(&settings).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!("Credential resolution failed: {:#}", e);
            return Envelope::failure(format!("{:#}", e));
        }
    };

    execute(catalog, descriptor, &invocation, &ctx).await
}
