//! The fact-module template
//!
//! One generic runner serves every descriptor: pick the eligible lookups,
//! construct the management client, issue each lookup and publish its
//! normalized result.

use super::args::{ArgValue, Invocation};
use super::envelope::Envelope;
use crate::azure::auth::SubscriptionContext;
use crate::azure::client::AzureClient;
use crate::azure::error::LookupOutcome;
use crate::azure::http::format_cloud_error;
use crate::resource::dispatch::{self, Fetched};
use crate::resource::fetcher::{empty_sentinel, normalize};
use crate::resource::{LookupDef, ResourceCatalog, ResourceDescriptor};
use anyhow::{Context, Result};
use serde_json::Map;

/// Lookups to run for the bound arguments, in declaration order.
///
/// A lookup is eligible when every one of its required arguments is bound.
/// Of the eligible lookups, those with the most required arguments run.
pub fn select_lookups<'a>(
    descriptor: &'a ResourceDescriptor,
    invocation: &Invocation,
) -> Vec<&'a LookupDef> {
    let eligible: Vec<&LookupDef> = descriptor
        .lookups
        .iter()
        .filter(|l| l.required_args.iter().all(|a| invocation.is_bound(a)))
        .collect();

    let Some(widest) = eligible.iter().map(|l| l.required_args.len()).max() else {
        return Vec::new();
    };

    eligible
        .into_iter()
        .filter(|l| l.required_args.len() == widest)
        .collect()
}

/// Whether `location` should be read from the resource group first
fn needs_location(descriptor: &ResourceDescriptor, invocation: &Invocation) -> bool {
    descriptor.default_location
        && !invocation.is_bound("location")
        && invocation.is_bound("resource_group")
}

/// Run a descriptor against the control plane.
///
/// Lookup-level cloud errors publish the empty sentinel and never fail the
/// run. Client construction errors are returned.
pub async fn run(
    catalog: &ResourceCatalog,
    descriptor: &ResourceDescriptor,
    invocation: &Invocation,
    ctx: &SubscriptionContext,
) -> Result<Envelope> {
    let defaulting = needs_location(descriptor, invocation);
    let mut selected = select_lookups(descriptor, invocation);

    if selected.is_empty() && !defaulting {
        tracing::info!(
            "{}: no lookup eligible for bound arguments [{}]",
            descriptor.module_name,
            invocation.bound_names().collect::<Vec<_>>().join(", ")
        );
        return Ok(Envelope::empty());
    }

    let client = AzureClient::new(ctx)
        .await
        .with_context(|| format!("Failed to construct {}", descriptor.client))?;

    let mut warnings = Vec::new();
    let mut invocation = invocation.clone();

    if defaulting {
        let resource_group = invocation
            .get("resource_group")
            .map(|v| v.to_param())
            .unwrap_or_default();
        match dispatch::resource_group_location(&client, &resource_group).await {
            Ok(Some(location)) => {
                tracing::debug!("Defaulted location to {} from {}", location, resource_group);
                invocation.bind("location", ArgValue::Str(location));
                selected = select_lookups(descriptor, &invocation);
            }
            Ok(None) => tracing::warn!("Resource group {} has no location", resource_group),
            Err(e) => {
                tracing::warn!("Failed to read location of {}: {}", resource_group, e);
                warnings.push(format!(
                    "Could not default location from resource group {}: {}",
                    resource_group,
                    format_cloud_error(&e)
                ));
            }
        }
    }

    let mut results = Map::new();
    for lookup in selected {
        let key = descriptor.published_key(lookup);
        let outcome: LookupOutcome<Fetched> =
            execute(&client, catalog, descriptor, lookup, &invocation)
                .await
                .into();

        let value = match outcome {
            LookupOutcome::Found(fetched) => normalize(
                lookup.shape,
                fetched,
                &invocation.common.tags,
                &mut warnings,
            ),
            LookupOutcome::NotFound => {
                tracing::info!("{}.{}: not found", descriptor.module_name, lookup.operation);
                empty_sentinel(lookup.shape)
            }
            LookupOutcome::Failed(e) => {
                tracing::warn!("{}.{} failed: {}", descriptor.module_name, lookup.operation, e);
                warnings.push(format!("{} failed: {}", key, format_cloud_error(&e)));
                empty_sentinel(lookup.shape)
            }
        };
        results.insert(key.to_string(), value);
    }

    Ok(Envelope::success(results).with_warnings(warnings))
}

async fn execute(
    client: &AzureClient,
    catalog: &ResourceCatalog,
    descriptor: &ResourceDescriptor,
    lookup: &LookupDef,
    invocation: &Invocation,
) -> Result<Fetched, crate::azure::error::CloudError> {
    let request = dispatch::prepare(client, catalog, descriptor, lookup, invocation)?;
    dispatch::invoke(client, &request, lookup.shape).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::get_registry;

    fn operations(lookups: Vec<&LookupDef>) -> Vec<&str> {
        lookups.iter().map(|l| l.operation.as_str()).collect()
    }

    fn invocation(values: &[(&str, &str)]) -> Invocation {
        Invocation::with_values(
            "test",
            values.iter().map(|(k, v)| (*k, ArgValue::Str(v.to_string()))),
        )
    }

    #[test]
    fn test_get_wins_over_list_all() {
        let lb = get_registry().unwrap().get("load_balancer").unwrap();
        let inv = invocation(&[("resource_group", "rg1"), ("load_balancer_name", "lb1")]);
        assert_eq!(operations(select_lookups(lb, &inv)), vec!["get"]);
    }

    #[test]
    fn test_partial_arguments_fall_back() {
        let lb = get_registry().unwrap().get("load_balancer").unwrap();
        let inv = invocation(&[("resource_group", "rg1")]);
        assert_eq!(operations(select_lookups(lb, &inv)), vec!["list_all"]);
    }

    #[test]
    fn test_ties_run_in_declaration_order() {
        let rule = get_registry().unwrap().get("security_rule").unwrap();
        let inv = invocation(&[("resource_group", "rg1"), ("security_group_name", "nsg")]);
        assert_eq!(operations(select_lookups(rule, &inv)), vec!["list", "list_default"]);
    }

    #[test]
    fn test_nothing_eligible() {
        let image = get_registry().unwrap().get("vm_image").unwrap();
        assert!(select_lookups(image, &invocation(&[("publisher", "Canonical")])).is_empty());
    }

    #[test]
    fn test_location_defaulting_condition() {
        let sizes = get_registry().unwrap().get("vm_size").unwrap();
        assert!(needs_location(sizes, &invocation(&[("resource_group", "rg1")])));
        let located = invocation(&[("resource_group", "rg1"), ("location", "eastus")]);
        assert!(!needs_location(sizes, &located));
        assert!(!needs_location(sizes, &invocation(&[])));
    }

    #[test]
    fn test_no_eligible_lookup_is_empty_envelope() {
        let catalog = get_registry().unwrap();
        let image = catalog.get("vm_image").unwrap();
        let ctx = SubscriptionContext {
            subscription_id: "sub-1".to_string(),
            // Unroutable: no request may be made
            cloud: crate::azure::cloud::CloudEnvironment::resolve("https://127.0.0.1:1").unwrap(),
            token_source: crate::azure::auth::TokenSource::ServicePrincipal {
                tenant: "t".into(),
                client_id: "c".into(),
                secret: "s".into(),
            },
        };

        let envelope = tokio_test::block_on(run(catalog, image, &invocation(&[]), &ctx)).unwrap();
        assert_eq!(envelope, Envelope::empty());
        assert!(!envelope.changed());
    }
}
