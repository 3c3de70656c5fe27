//! Result envelope returned to the host runtime

use serde::Serialize;
use serde_json::{Map, Value};

fn is_false(b: &bool) -> bool {
    !*b
}

/// The JSON document a fact module prints on stdout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Facts never change anything
    changed: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Envelope {
    pub fn success(results: Map<String, Value>) -> Self {
        Self {
            changed: false,
            failed: false,
            msg: None,
            results: Some(results),
            warnings: Vec::new(),
        }
    }

    /// Nothing was eligible to run
    pub fn empty() -> Self {
        Self::success(Map::new())
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            changed: false,
            failed: true,
            msg: Some(msg.into()),
            results: None,
            warnings: Vec::new(),
        }
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Result published under `key`, if any
    pub fn result(&self, key: &str) -> Option<&Value> {
        self.results.as_ref().and_then(|r| r.get(key))
    }

    /// Process exit status for this envelope
    pub fn exit_code(&self) -> i32 {
        if self.failed {
            1
        } else {
            0
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing maps of JSON values cannot fail
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"changed": false, "failed": true, "msg": "failed to encode result: {}"}}"#,
                e
            )
        })
    }
}
