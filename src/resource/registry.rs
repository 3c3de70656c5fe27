//! Resource Registry - Load fact module descriptors from JSON
//!
//! Every supported resource kind is a descriptor in one of the embedded JSON
//! files. Descriptors are validated once, on first access; the rest of the
//! crate only ever sees a validated catalog.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[(&str, &str)] = &[
    ("clients.json", include_str!("../resources/clients.json")),
    ("network.json", include_str!("../resources/network.json")),
    ("dns.json", include_str!("../resources/dns.json")),
    ("compute.json", include_str!("../resources/compute.json")),
    ("containers.json", include_str!("../resources/containers.json")),
    ("web.json", include_str!("../resources/web.json")),
    ("database.json", include_str!("../resources/database.json")),
    ("authorization.json", include_str!("../resources/authorization.json")),
    ("resources.json", include_str!("../resources/resources.json")),
];

/// Argument names every module accepts in addition to its own
pub const COMMON_ARGUMENTS: &[&str] = &[
    "auth_source",
    "client_id",
    "cloud_environment",
    "profile",
    "secret",
    "subscription_id",
    "tags",
    "tenant",
];

/// Placeholder filled from the subscription context rather than an argument
pub const SUBSCRIPTION_PLACEHOLDER: &str = "subscription_id";

/// Declared type of a module argument
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    #[default]
    String,
    Integer,
}

/// Explicit coercion applied to a string argument after validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coercion {
    Bool,
}

/// Module argument definition from JSON
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArgumentDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub arg_type: ArgType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub coerce: Option<Coercion>,
    /// Name on the wire when sent as a query parameter or body field
    #[serde(default)]
    pub wire_name: Option<String>,
    /// Value is an ARM scope (`/subscriptions/...`) spliced into the path as-is
    #[serde(default)]
    pub raw_path: bool,
}

impl ArgumentDef {
    pub fn wire_name(&self) -> &str {
        self.wire_name.as_deref().unwrap_or(&self.name)
    }
}

/// How a lookup's arguments reach the request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    /// Every argument is a path segment
    #[default]
    Positional,
    /// Arguments not in the path become query parameters (GET) or body fields (POST)
    Keyword,
}

/// Prefix a lookup path is relative to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Tenant,
    Subscription,
    #[default]
    ResourceGroup,
}

impl Scope {
    pub fn prefix(&self) -> &'static str {
        match self {
            Scope::Tenant => "",
            Scope::Subscription => "/subscriptions/{subscription_id}",
            Scope::ResourceGroup => {
                "/subscriptions/{subscription_id}/resourceGroups/{resource_group}"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Normalization applied to a lookup's response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    #[default]
    Single,
    List,
    MapByName,
}

impl Shape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Single => "single",
            Shape::List => "list",
            Shape::MapByName => "map_by_name",
        }
    }
}

/// One operation on the client's operation group
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupDef {
    pub operation: String,
    #[serde(default)]
    pub required_args: Vec<String>,
    /// Keyword-bound arguments sent only when present
    #[serde(default)]
    pub optional_args: Vec<String>,
    #[serde(default)]
    pub binding: Binding,
    #[serde(default)]
    pub scope: Scope,
    /// Path relative to the scope prefix, with `{argument}` placeholders
    pub path: String,
    #[serde(default)]
    pub method: HttpMethod,
    pub shape: Shape,
    #[serde(default)]
    pub published_key: Option<String>,
    /// Overrides the client's api-version
    #[serde(default)]
    pub api_version: Option<String>,
}

impl LookupDef {
    /// Full path template, scope prefix included
    pub fn path_template(&self) -> String {
        let path = self.path.trim_start_matches('/');
        let prefix = self.scope.prefix();
        if path.is_empty() {
            prefix.to_string()
        } else {
            format!("{}/{}", prefix, path)
        }
    }
}

/// Resource descriptor from JSON
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceDescriptor {
    /// Filled in from the catalog key
    #[serde(skip)]
    pub module_name: String,
    pub client: String,
    pub operation_group: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentDef>,
    pub lookups: Vec<LookupDef>,
    /// Published key for descriptors with exactly one lookup
    #[serde(default)]
    pub result_key: Option<String>,
    /// Resolve `location` from `resource_group` when it isn't given
    #[serde(default)]
    pub default_location: bool,
}

impl ResourceDescriptor {
    pub fn argument(&self, name: &str) -> Option<&ArgumentDef> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// Key a lookup's result is published under
    pub fn published_key<'a>(&'a self, lookup: &'a LookupDef) -> &'a str {
        if let Some(key) = lookup.published_key.as_deref() {
            return key;
        }
        match (self.result_key.as_deref(), self.lookups.len()) {
            (Some(key), 1) => key,
            _ => &lookup.operation,
        }
    }
}

/// SDK client definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ClientDef {
    /// Resource provider namespace (`Microsoft.Network`)
    pub provider: String,
    pub api_version: String,
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub clients: HashMap<String, ClientDef>,
    #[serde(default)]
    pub modules: BTreeMap<String, ResourceDescriptor>,
}

/// The validated catalog of every fact module
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    pub clients: HashMap<String, ClientDef>,
    pub modules: BTreeMap<String, ResourceDescriptor>,
}

impl ResourceCatalog {
    /// Merge and validate catalog sources given as `(file name, JSON)`
    pub fn from_sources(sources: &[(&str, &str)]) -> Result<Self> {
        let mut catalog = ResourceCatalog::default();

        for (file, content) in sources {
            let partial: ResourceConfig = serde_json::from_str(content)
                .with_context(|| format!("Failed to parse resource file {}", file))?;

            catalog.clients.extend(partial.clients);
            for (name, mut descriptor) in partial.modules {
                if catalog.modules.contains_key(&name) {
                    return Err(anyhow::anyhow!("Duplicate module '{}' in {}", name, file));
                }
                descriptor.module_name = name.clone();
                catalog.modules.insert(name, descriptor);
            }
        }

        for descriptor in catalog.modules.values() {
            catalog
                .validate(descriptor)
                .with_context(|| format!("Invalid descriptor '{}'", descriptor.module_name))?;
        }

        Ok(catalog)
    }

    pub fn get(&self, module_name: &str) -> Option<&ResourceDescriptor> {
        self.modules.get(module_name)
    }

    pub fn client(&self, name: &str) -> Option<&ClientDef> {
        self.clients.get(name)
    }

    /// api-version a lookup is issued with
    pub fn api_version<'a>(
        &'a self,
        descriptor: &ResourceDescriptor,
        lookup: &'a LookupDef,
    ) -> Option<&'a str> {
        lookup
            .api_version
            .as_deref()
            .or_else(|| self.client(&descriptor.client).map(|c| c.api_version.as_str()))
    }

    fn validate(&self, d: &ResourceDescriptor) -> Result<()> {
        let client = self
            .client(&d.client)
            .with_context(|| format!("unknown client '{}'", d.client))?;
        if client.api_version.is_empty() {
            return Err(anyhow::anyhow!("client '{}' has no api_version", d.client));
        }
        if d.lookups.is_empty() {
            return Err(anyhow::anyhow!("no lookups"));
        }

        let mut declared = BTreeSet::new();
        for arg in &d.arguments {
            if COMMON_ARGUMENTS.contains(&arg.name.as_str()) {
                return Err(anyhow::anyhow!("argument '{}' shadows a common argument", arg.name));
            }
            if !declared.insert(arg.name.as_str()) {
                return Err(anyhow::anyhow!("argument '{}' declared twice", arg.name));
            }
            if arg.coerce.is_some() && arg.arg_type != ArgType::String {
                return Err(anyhow::anyhow!(
                    "only string arguments can be coerced ('{}')",
                    arg.name
                ));
            }
        }

        if d.result_key.is_some() && d.lookups.len() != 1 {
            return Err(anyhow::anyhow!("result_key requires exactly one lookup"));
        }
        let has_location = declared.contains("location") && declared.contains("resource_group");
        if d.default_location && !has_location {
            return Err(anyhow::anyhow!(
                "default_location requires 'location' and 'resource_group' arguments"
            ));
        }

        let mut published = BTreeSet::new();
        for lookup in &d.lookups {
            let op = &lookup.operation;
            if !published.insert(d.published_key(lookup)) {
                return Err(anyhow::anyhow!(
                    "published key '{}' used twice",
                    d.published_key(lookup)
                ));
            }

            for arg in lookup.required_args.iter().chain(&lookup.optional_args) {
                if !declared.contains(arg.as_str()) {
                    return Err(anyhow::anyhow!(
                        "lookup '{}' uses undeclared argument '{}'",
                        op,
                        arg
                    ));
                }
            }

            let template = lookup.path_template();
            let placeholders = placeholders(&template);
            for placeholder in &placeholders {
                if *placeholder != SUBSCRIPTION_PLACEHOLDER
                    && !lookup.required_args.iter().any(|a| a == placeholder)
                {
                    return Err(anyhow::anyhow!(
                        "lookup '{}' path placeholder '{{{}}}' is not a required argument",
                        op,
                        placeholder
                    ));
                }
            }

            if lookup.binding == Binding::Positional {
                if !lookup.optional_args.is_empty() {
                    return Err(anyhow::anyhow!(
                        "positional lookup '{}' cannot take optional args",
                        op
                    ));
                }
                if let Some(unused) = lookup
                    .required_args
                    .iter()
                    .find(|a| !placeholders.contains(&a.as_str()))
                {
                    return Err(anyhow::anyhow!(
                        "positional lookup '{}' does not bind '{}' in its path",
                        op,
                        unused
                    ));
                }
            }
        }

        Ok(())
    }

    /// JSON summary of the catalog, for `--list`
    pub fn summary(&self) -> Value {
        let modules: Vec<Value> = self
            .modules
            .values()
            .map(|d| {
                let provider = self.client(&d.client).map(|c| c.provider.as_str());
                let lookups: Vec<Value> = d
                    .lookups
                    .iter()
                    .map(|l| {
                        json!({
                            "operation": l.operation,
                            "required_args": l.required_args,
                            "shape": l.shape.as_str(),
                            "published_key": d.published_key(l),
                        })
                    })
                    .collect();
                json!({
                    "module": d.module_name,
                    "client": d.client,
                    "provider": provider,
                    "operation_group": d.operation_group,
                    "arguments": d.arguments.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
                    "lookups": lookups,
                })
            })
            .collect();
        json!({ "modules": modules })
    }
}

/// Names of the `{placeholder}`s in a path template, in order
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        found.push(&after[..end]);
        rest = &after[end + 1..];
    }
    found
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<Result<ResourceCatalog, String>> = OnceLock::new();

/// Get the resource catalog (loads from embedded JSON on first access)
pub fn get_registry() -> Result<&'static ResourceCatalog> {
    REGISTRY
        .get_or_init(|| {
            ResourceCatalog::from_sources(RESOURCE_FILES).map_err(|e| format!("{:#}", e))
        })
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Embedded resource catalog is invalid: {}", e))
}

/// Get a descriptor by module name
pub fn get_resource(module_name: &str) -> Result<Option<&'static ResourceDescriptor>> {
    Ok(get_registry()?.get(module_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENTS: &str = r#"{"clients": {
        "TestClient": {"provider": "Microsoft.Test", "api_version": "2020-01-01"}
    }}"#;

    fn catalog_with(module: &str) -> Result<ResourceCatalog> {
        let modules = format!(r#"{{"modules": {{"widget": {}}}}}"#, module);
        ResourceCatalog::from_sources(&[("clients.json", CLIENTS), ("test.json", &modules)])
    }

    #[test]
    fn test_registry_loads_successfully() {
        let registry = get_registry().expect("embedded catalog must validate");
        assert!(
            registry.modules.len() >= 60,
            "Registry should cover the full resource table, got {}",
            registry.modules.len()
        );
    }

    #[test]
    fn test_load_balancer_descriptor() {
        let lb = get_resource("load_balancer").unwrap().expect("load_balancer exists");
        assert_eq!(lb.module_name, "load_balancer");
        assert_eq!(lb.client, "NetworkManagementClient");
        assert_eq!(lb.operation_group, "load_balancers");

        let keys: Vec<&str> = lb.lookups.iter().map(|l| lb.published_key(l)).collect();
        assert_eq!(keys, vec!["get", "list_all"]);
    }

    #[test]
    fn test_result_key_publishes_single_lookup() {
        let bgp = get_resource("bgp_service_communities").unwrap().unwrap();
        assert_eq!(bgp.published_key(&bgp.lookups[0]), "bgp_service_communities");
        assert_eq!(bgp.lookups[0].shape, Shape::MapByName);
    }

    #[test]
    fn test_get_resource_by_module_name() {
        assert!(get_resource("security_rule").unwrap().is_some());
        assert!(get_resource("container_logs").unwrap().is_some());
        assert!(get_resource("no_such_module").unwrap().is_none());
    }

    #[test]
    fn test_every_lookup_has_an_api_version() {
        let registry = get_registry().unwrap();
        for d in registry.modules.values() {
            for l in &d.lookups {
                assert!(registry.api_version(d, l).is_some(), "{}::{}", d.module_name, l.operation);
            }
        }
    }

    #[test]
    fn test_placeholders_in_order() {
        assert_eq!(
            placeholders("/subscriptions/{subscription_id}/resourceGroups/{rg}/x/{name}"),
            vec!["subscription_id", "rg", "name"]
        );
        assert!(placeholders("/providers/Microsoft.Network/bgpServiceCommunities").is_empty());
    }

    #[test]
    fn test_rejects_placeholder_not_required() {
        let err = catalog_with(
            r#"{"client": "TestClient", "operation_group": "widgets",
                "arguments": [{"name": "resource_group"}, {"name": "name"}],
                "lookups": [{"operation": "get", "required_args": ["resource_group"],
                             "path": "providers/Microsoft.Test/widgets/{name}",
                             "shape": "single"}]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("'{name}'"));
    }

    #[test]
    fn test_rejects_positional_arg_outside_path() {
        let err = catalog_with(
            r#"{"client": "TestClient", "operation_group": "widgets",
                "arguments": [{"name": "color"}],
                "lookups": [{"operation": "list", "required_args": ["color"],
                             "scope": "subscription",
                             "path": "providers/Microsoft.Test/widgets", "shape": "list"}]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("does not bind 'color'"));
    }

    #[test]
    fn test_rejects_unknown_client_and_shadowed_common_arg() {
        assert!(catalog_with(
            r#"{"client": "Nope", "operation_group": "w",
                "lookups": [{"operation": "list", "scope": "tenant", "path": "x",
                             "shape": "list"}]}"#,
        )
        .is_err());

        assert!(catalog_with(
            r#"{"client": "TestClient", "operation_group": "w", "arguments": [{"name": "tenant"}],
                "lookups": [{"operation": "list", "scope": "tenant", "path": "x",
                             "shape": "list"}]}"#,
        )
        .is_err());
    }

    #[test]
    fn test_rejects_result_key_with_many_lookups() {
        assert!(catalog_with(
            r#"{"client": "TestClient", "operation_group": "w", "result_key": "widgets",
                "lookups": [{"operation": "list", "scope": "tenant", "path": "x",
                             "shape": "list"},
                            {"operation": "list_all", "scope": "subscription", "path": "x",
                             "shape": "list"}]}"#,
        )
        .is_err());
    }

    #[test]
    fn test_accepts_keyword_optional_args() {
        let catalog = catalog_with(
            r#"{"client": "TestClient", "operation_group": "w",
                "arguments": [{"name": "resource_group"},
                              {"name": "top", "type": "integer", "wire_name": "$top"}],
                "lookups": [{"operation": "list", "required_args": ["resource_group"],
                             "optional_args": ["top"], "binding": "keyword",
                             "path": "providers/Microsoft.Test/w", "shape": "list"}]}"#,
        )
        .unwrap();
        let widget = catalog.get("widget").unwrap();
        assert_eq!(widget.argument("top").unwrap().wire_name(), "$top");
        assert_eq!(widget.argument("top").unwrap().arg_type, ArgType::Integer);
    }

    #[test]
    fn test_summary_lists_modules() {
        let summary = get_registry().unwrap().summary();
        let modules = summary["modules"].as_array().unwrap();
        assert!(modules.iter().any(|m| m["module"] == "resource_group"));
    }
}
