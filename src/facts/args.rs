//! Argument validation and binding
//!
//! Merges a descriptor's argument schema with the common credential
//! arguments, validates the raw bag supplied by the host runtime and binds
//! the result into an [`Invocation`].

use crate::azure::auth::{AuthSource, CredentialFields, CredentialSettings};
use crate::resource::{ArgType, Coercion, ResourceDescriptor, COMMON_ARGUMENTS};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Prefix of host-internal keys (`_ansible_check_mode`, ...)
const INTERNAL_PREFIX: &str = "_ansible_";

/// Arguments whose values never appear in the envelope
const NO_LOG_ARGUMENTS: &[&str] = &["secret"];

const NO_LOG_PLACEHOLDER: &str = "VALUE_SPECIFIED_IN_NO_LOG_PARAMETER";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("module arguments must be a mapping")]
    NotAMapping,
    #[error("Unsupported parameters for ({module}) module: {names}. Supported parameters include: {supported}")]
    Unsupported {
        module: String,
        names: String,
        supported: String,
    },
    #[error("missing required arguments: {0}")]
    MissingRequired(String),
    #[error("argument {name} is of type {found} and we were unable to convert to {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("argument {name} could not be interpreted as a boolean: {value}")]
    InvalidBool { name: String, value: String },
    #[error("argument {name} must be a resource scope starting with '/': {value}")]
    InvalidScope { name: String, value: String },
}

/// A bound argument value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl ArgValue {
    /// Representation used in paths and query strings
    pub fn to_param(&self) -> String {
        match self {
            ArgValue::Str(s) => s.clone(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Bool(b) => b.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ArgValue::Str(s) => Value::String(s.clone()),
            ArgValue::Int(i) => Value::from(*i),
            ArgValue::Bool(b) => Value::Bool(*b),
        }
    }
}

/// `key` or `key:value` tag filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub value: Option<String>,
}

impl TagFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(match raw.split_once(':') {
            Some((key, value)) => Self {
                key: key.trim().to_string(),
                value: Some(value.trim().to_string()),
            },
            None => Self {
                key: raw.to_string(),
                value: None,
            },
        })
    }

    /// Whether a resource's `tags` mapping satisfies this filter
    pub fn matches(&self, tags: Option<&Map<String, Value>>) -> bool {
        let Some(actual) = tags.and_then(|t| t.get(&self.key)) else {
            return false;
        };
        match &self.value {
            None => true,
            Some(expected) => actual.as_str() == Some(expected.as_str()),
        }
    }
}

/// The common arguments every module accepts
#[derive(Debug, Clone, Default)]
pub struct CommonArgs {
    pub credentials: CredentialSettings,
    pub tags: Vec<TagFilter>,
}

/// Arguments bound for one module invocation
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub module_name: String,
    values: BTreeMap<String, ArgValue>,
    pub common: CommonArgs,
    /// Arguments as received, no-log values masked
    pub module_args: Map<String, Value>,
}

impl Invocation {
    /// Invocation with no common arguments, mostly for tests and tooling
    pub fn with_values<I, K>(module_name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (K, ArgValue)>,
        K: Into<String>,
    {
        Self {
            module_name: module_name.to_string(),
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..Default::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    /// Bound and non-empty
    pub fn is_bound(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn bind(&mut self, name: &str, value: ArgValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn bound_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }
}

/// Validate a raw argument bag against a descriptor and bind it
pub fn bind(descriptor: &ResourceDescriptor, raw: &Value) -> Result<Invocation, ArgumentError> {
    let Value::Object(raw) = raw else {
        return Err(ArgumentError::NotAMapping);
    };

    let mut unsupported: Vec<&str> = raw
        .keys()
        .map(|k| k.as_str())
        .filter(|k| !k.starts_with(INTERNAL_PREFIX))
        .filter(|k| !COMMON_ARGUMENTS.contains(k) && descriptor.argument(k).is_none())
        .collect();
    if !unsupported.is_empty() {
        unsupported.sort_unstable();
        let mut supported: Vec<&str> = descriptor
            .arguments
            .iter()
            .map(|a| a.name.as_str())
            .chain(COMMON_ARGUMENTS.iter().copied())
            .collect();
        supported.sort_unstable();
        return Err(ArgumentError::Unsupported {
            module: descriptor.module_name.clone(),
            names: unsupported.join(", "),
            supported: supported.join(", "),
        });
    }

    let mut values = BTreeMap::new();
    let mut missing = Vec::new();

    for def in &descriptor.arguments {
        let value = match raw.get(&def.name) {
            None | Some(Value::Null) => None,
            Some(v) => convert(&def.name, def.arg_type, v)?,
        };

        let value = match (value, def.coerce) {
            (Some(ArgValue::Str(s)), Some(Coercion::Bool)) => {
                Some(ArgValue::Bool(parse_bool(&def.name, &s)?))
            }
            (value, _) => value,
        };

        if def.raw_path {
            if let Some(ArgValue::Str(s)) = &value {
                validate_scope(&def.name, s)?;
            }
        }

        match value {
            Some(v) => {
                values.insert(def.name.clone(), v);
            }
            None if def.required => missing.push(def.name.as_str()),
            None => {}
        }
    }

    if !missing.is_empty() {
        return Err(ArgumentError::MissingRequired(missing.join(", ")));
    }

    let common = bind_common(raw)?;
    let module_args = raw
        .iter()
        .filter(|(k, _)| !k.starts_with(INTERNAL_PREFIX))
        .map(|(k, v)| {
            if NO_LOG_ARGUMENTS.contains(&k.as_str()) && !v.is_null() {
                (k.clone(), Value::String(NO_LOG_PLACEHOLDER.to_string()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect();

    Ok(Invocation {
        module_name: descriptor.module_name.clone(),
        values,
        common,
        module_args,
    })
}

/// Convert a raw value to the declared type. Empty strings count as unbound.
fn convert(
    name: &str,
    expected: ArgType,
    value: &Value,
) -> Result<Option<ArgValue>, ArgumentError> {
    let mismatch = |found| ArgumentError::TypeMismatch {
        name: name.to_string(),
        expected: match expected {
            ArgType::String => "str",
            ArgType::Integer => "int",
        },
        found,
    };

    match (expected, value) {
        (_, Value::String(s)) if s.trim().is_empty() => Ok(None),
        (ArgType::String, Value::String(s)) => Ok(Some(ArgValue::Str(s.clone()))),
        (ArgType::String, Value::Number(n)) => Ok(Some(ArgValue::Str(n.to_string()))),
        (ArgType::String, Value::Bool(b)) => Ok(Some(ArgValue::Str(b.to_string()))),
        (ArgType::Integer, Value::Number(n)) => n
            .as_i64()
            .map(|i| Some(ArgValue::Int(i)))
            .ok_or_else(|| mismatch("float")),
        (ArgType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(|i| Some(ArgValue::Int(i)))
            .map_err(|_| mismatch("str")),
        (ArgType::Integer, Value::Bool(_)) => Err(mismatch("bool")),
        (_, Value::Array(_)) => Err(mismatch("list")),
        (_, Value::Object(_)) => Err(mismatch("dict")),
        (_, Value::Null) => Ok(None),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ArgumentError> {
    match raw.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "t" | "1" | "on" => Ok(true),
        "no" | "n" | "false" | "f" | "0" | "off" => Ok(false),
        _ => Err(ArgumentError::InvalidBool {
            name: name.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn validate_scope(name: &str, scope: &str) -> Result<(), ArgumentError> {
    // URL joining resolves percent-encoded dot segments too
    let decoded = urlencoding::decode(scope).map(|d| d.to_ascii_lowercase());
    let valid = scope.starts_with('/')
        && !scope.contains(['\\', '?', '#'])
        && !scope.contains(char::is_whitespace)
        && decoded.is_ok_and(|d| {
            !d.contains("..") && !d.contains("%2e") && !d.contains(['\\', '?', '#'])
        });
    if valid {
        Ok(())
    } else {
        Err(ArgumentError::InvalidScope {
            name: name.to_string(),
            value: scope.to_string(),
        })
    }
}

fn bind_common(raw: &Map<String, Value>) -> Result<CommonArgs, ArgumentError> {
    let string = |name: &str| -> Result<Option<String>, ArgumentError> {
        match raw.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => convert(name, ArgType::String, v).map(|v| v.map(|v| v.to_param())),
        }
    };

    let auth_source = match string("auth_source")? {
        Some(raw_source) => raw_source
            .parse::<AuthSource>()
            .map_err(|_| ArgumentError::TypeMismatch {
                name: "auth_source".to_string(),
                expected: "one of auto, cli, credential_file, env, msi",
                found: "str",
            })?,
        None => AuthSource::Auto,
    };

    let tags = match raw.get("tags") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.split(',').filter_map(TagFilter::parse).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(TagFilter::parse(s)),
                _ => Err(ArgumentError::TypeMismatch {
                    name: "tags".to_string(),
                    expected: "list of str",
                    found: "list",
                }),
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect(),
        Some(_) => {
            return Err(ArgumentError::TypeMismatch {
                name: "tags".to_string(),
                expected: "list",
                found: "dict",
            })
        }
    };

    Ok(CommonArgs {
        credentials: CredentialSettings {
            auth_source,
            profile: string("profile")?,
            explicit: CredentialFields {
                subscription_id: string("subscription_id")?,
                client_id: string("client_id")?,
                secret: string("secret")?,
                tenant: string("tenant")?,
                cloud_environment: string("cloud_environment")?,
            },
            access_token: None,
            default_cloud: None,
        },
        tags,
    })
}
