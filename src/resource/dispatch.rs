//! SDK Dispatch
//!
//! Turns a descriptor lookup plus bound arguments into a concrete Resource
//! Manager request, and issues it.

use super::registry::{
    placeholders, Binding, HttpMethod, LookupDef, ResourceCatalog, ResourceDescriptor, Shape,
    SUBSCRIPTION_PLACEHOLDER,
};
use crate::azure::client::AzureClient;
use crate::azure::error::CloudError;
use crate::facts::args::Invocation;
use reqwest::Method;
use serde_json::{Map, Value};
use url::Url;

/// api-version used to read a resource group's location
const RESOURCE_GROUP_API_VERSION: &str = "2021-04-01";

/// A fully bound request, ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<Value>,
}

/// Raw response of a lookup before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    One(Value),
    Many(Vec<Value>),
}

/// Build the request for `lookup` from the bound arguments
pub fn prepare(
    client: &AzureClient,
    catalog: &ResourceCatalog,
    descriptor: &ResourceDescriptor,
    lookup: &LookupDef,
    invocation: &Invocation,
) -> Result<PreparedRequest, CloudError> {
    let api_version = catalog.api_version(descriptor, lookup).ok_or_else(|| {
        CloudError::transport(format!("No api-version for client '{}'", descriptor.client))
    })?;

    let template = lookup.path_template();
    let path = render_path(&template, descriptor, invocation, &client.subscription_id)?;
    let mut url = client.arm_url(&path, api_version)?;

    let method = match lookup.method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
    };

    let mut body = None;
    if lookup.binding == Binding::Keyword {
        let in_path = placeholders(&template);
        let keyword_args = lookup
            .required_args
            .iter()
            .filter(|a| !in_path.contains(&a.as_str()))
            .chain(&lookup.optional_args);

        let mut fields = Map::new();
        for name in keyword_args {
            let Some(value) = invocation.get(name) else {
                continue;
            };
            let wire = descriptor
                .argument(name)
                .map(|a| a.wire_name())
                .unwrap_or(name.as_str());

            if method == Method::POST {
                fields.insert(wire.to_string(), value.to_json());
            } else {
                url.query_pairs_mut().append_pair(wire, &value.to_param());
            }
        }

        if method == Method::POST {
            body = Some(Value::Object(fields));
        }
    }

    Ok(PreparedRequest { method, url, body })
}

/// Substitute `{placeholder}`s, percent-encoding every value except raw scopes
fn render_path(
    template: &str,
    descriptor: &ResourceDescriptor,
    invocation: &Invocation,
    subscription_id: &str,
) -> Result<String, CloudError> {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| {
                CloudError::transport(format!("Unterminated placeholder in '{}'", template))
            })?;
        let name = &after[..end];

        if name == SUBSCRIPTION_PLACEHOLDER {
            out.push_str(&urlencoding::encode(subscription_id));
        } else {
            let value = invocation
                .get(name)
                .ok_or_else(|| CloudError::transport(format!("Argument '{}' is not bound", name)))?
                .to_param();
            if descriptor.argument(name).is_some_and(|a| a.raw_path) {
                out.push_str(value.trim_start_matches('/').trim_end_matches('/'));
            } else {
                out.push_str(&urlencoding::encode(&value));
            }
        }

        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Issue a prepared request; list shapes follow every page
pub async fn invoke(
    client: &AzureClient,
    request: &PreparedRequest,
    shape: Shape,
) -> Result<Fetched, CloudError> {
    tracing::debug!("invoke: {} {} ({})", request.method, request.url, shape.as_str());

    match shape {
        Shape::Single => client
            .send(&request.method, &request.url, request.body.as_ref())
            .await
            .map(Fetched::One),
        Shape::List | Shape::MapByName => client
            .list_all(&request.method, &request.url, request.body.as_ref())
            .await
            .map(Fetched::Many),
    }
}

/// Read the location of a resource group, `None` when it has none
pub async fn resource_group_location(
    client: &AzureClient,
    resource_group: &str,
) -> Result<Option<String>, CloudError> {
    let path = client.resource_group_path(resource_group);
    let url = client.arm_url(&path, RESOURCE_GROUP_API_VERSION)?;
    let group = client.get(&url).await?;
    Ok(group
        .get("location")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::auth::{SubscriptionContext, TokenSource};
    use crate::azure::cloud::CloudEnvironment;
    use crate::facts::args::ArgValue;
    use crate::resource::get_registry;

    async fn client() -> AzureClient {
        let ctx = SubscriptionContext {
            subscription_id: "sub-1".to_string(),
            cloud: CloudEnvironment::resolve("https://rm.example.test").unwrap(),
            token_source: TokenSource::Static("token".to_string()),
        };
        AzureClient::new(&ctx).await.unwrap()
    }

    fn lookup<'a>(d: &'a ResourceDescriptor, op: &str) -> &'a LookupDef {
        d.lookups.iter().find(|l| l.operation == op).unwrap()
    }

    #[tokio::test]
    async fn test_prepare_positional_get() {
        let catalog = get_registry().unwrap();
        let lb = catalog.get("load_balancer").unwrap();
        let inv = Invocation::with_values(
            "load_balancer",
            [
                ("resource_group", ArgValue::Str("rg 1".into())),
                ("load_balancer_name", ArgValue::Str("lb1".into())),
            ],
        );

        let req = prepare(&client().await, catalog, lb, lookup(lb, "get"), &inv).unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(
            req.url.path(),
            "/subscriptions/sub-1/resourceGroups/rg%201/providers/Microsoft.Network/loadBalancers/lb1"
        );
        assert!(req.url.query().unwrap().starts_with("api-version="));
        assert_eq!(req.body, None);
    }

    #[tokio::test]
    async fn test_prepare_keyword_query_skips_unbound_optional() {
        let catalog = get_registry().unwrap();
        let logs = catalog.get("container_logs").unwrap();
        let mut inv = Invocation::with_values(
            "container_logs",
            [
                ("resource_group", ArgValue::Str("rg1".into())),
                ("name", ArgValue::Str("group1".into())),
                ("container_name", ArgValue::Str("web".into())),
            ],
        );

        let req = prepare(&client().await, catalog, logs, &logs.lookups[0], &inv).unwrap();
        assert!(!req.url.query().unwrap().contains("tail"));

        inv.bind("tail", ArgValue::Int(100));
        let req = prepare(&client().await, catalog, logs, &logs.lookups[0], &inv).unwrap();
        assert!(req.url.query().unwrap().contains("tail=100"));
    }

    #[tokio::test]
    async fn test_prepare_post_body_uses_wire_names() {
        let catalog = get_registry().unwrap();
        let agreements = catalog.get("domain_agreements").unwrap();
        let inv = Invocation::with_values(
            "domain_agreements",
            [
                ("top_level_domain", ArgValue::Str("com".into())),
                ("include_privacy", ArgValue::Bool(true)),
                ("for_transfer", ArgValue::Bool(false)),
            ],
        );

        let list = &agreements.lookups[0];
        let req = prepare(&client().await, catalog, agreements, list, &inv).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(
            req.body,
            Some(serde_json::json!({"includePrivacy": true, "forTransfer": false}))
        );
        assert!(req.url.path().ends_with("/topLevelDomains/com/listAgreements"));
    }

    #[tokio::test]
    async fn test_raw_scope_is_not_encoded() {
        let catalog = get_registry().unwrap();
        let roles = catalog.get("role_definition").unwrap();
        let inv = Invocation::with_values(
            "role_definition",
            [("scope", ArgValue::Str("/subscriptions/sub-1/resourceGroups/rg1".into()))],
        );

        let req = prepare(&client().await, catalog, roles, lookup(roles, "list"), &inv).unwrap();
        assert_eq!(
            req.url.path(),
            "/subscriptions/sub-1/resourceGroups/rg1/providers/Microsoft.Authorization/roleDefinitions"
        );
    }

    #[test]
    fn test_render_path_requires_bound_arguments() {
        let d = ResourceDescriptor::default();
        let inv = Invocation::default();
        assert!(render_path("/x/{name}", &d, &inv, "s").is_err());
        assert_eq!(
            render_path("/subscriptions/{subscription_id}", &d, &inv, "s").unwrap(),
            "/subscriptions/s"
        );
    }
}
