//! Resource Fetcher
//!
//! Normalizes raw lookup responses into the shape a descriptor asks for.

use super::dispatch::Fetched;
use super::registry::Shape;
use crate::facts::args::TagFilter;
use serde_json::{Map, Value};

/// The value published when a lookup yields nothing or fails
pub fn empty_sentinel(shape: Shape) -> Value {
    match shape {
        Shape::Single | Shape::MapByName => Value::Object(Map::new()),
        Shape::List => Value::Array(Vec::new()),
    }
}

/// Whether an item carries every requested tag
pub fn matches_tags(item: &Value, tags: &[TagFilter]) -> bool {
    let item_tags = item.get("tags").and_then(|t| t.as_object());
    tags.iter().all(|filter| filter.matches(item_tags))
}

/// Normalize a fetched response.
///
/// Items that fail the tag filter are dropped. In `map_by_name`, items without
/// a string `name` are dropped too and reported through `warnings`.
pub fn normalize(
    shape: Shape,
    fetched: Fetched,
    tags: &[TagFilter],
    warnings: &mut Vec<String>,
) -> Value {
    let items = match fetched {
        Fetched::One(Value::Null) => return empty_sentinel(shape),
        Fetched::One(item) if shape == Shape::Single => {
            return if matches_tags(&item, tags) {
                item
            } else {
                empty_sentinel(shape)
            };
        }
        Fetched::One(Value::Array(items)) => items,
        Fetched::One(item) => vec![item],
        Fetched::Many(items) => items,
    };

    let mut kept = items.into_iter().filter(|item| matches_tags(item, tags));

    match shape {
        Shape::List => Value::Array(kept.collect()),
        Shape::MapByName => {
            let mut by_name = Map::new();
            for item in kept {
                let name = item.get("name").and_then(|n| n.as_str()).map(str::to_string);
                match name {
                    Some(name) => {
                        by_name.insert(name, item);
                    }
                    None => {
                        let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("-");
                        tracing::warn!("Skipping item without a name (id: {})", id);
                        warnings.push(format!("Skipped an item without a name (id: {})", id));
                    }
                }
            }
            Value::Object(by_name)
        }
        // A single-shape lookup answered with a list publishes the first item
        Shape::Single => kept.next().unwrap_or_else(|| empty_sentinel(shape)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tag(raw: &str) -> TagFilter {
        TagFilter::parse(raw).unwrap()
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(empty_sentinel(Shape::Single), json!({}));
        assert_eq!(empty_sentinel(Shape::List), json!([]));
        assert_eq!(empty_sentinel(Shape::MapByName), json!({}));
    }

    #[test]
    fn test_single_passthrough() {
        let mut warnings = Vec::new();
        let item = json!({"name": "lb1", "location": "eastus"});
        let out = normalize(Shape::Single, Fetched::One(item.clone()), &[], &mut warnings);
        assert_eq!(out, item);
    }

    #[test]
    fn test_single_tag_mismatch_is_sentinel() {
        let mut warnings = Vec::new();
        let item = json!({"name": "lb1", "tags": {"env": "dev"}});
        let out = normalize(Shape::Single, Fetched::One(item), &[tag("env:prod")], &mut warnings);
        assert_eq!(out, json!({}));
    }

    #[test]
    fn test_list_filters_by_tags() {
        let mut warnings = Vec::new();
        let items = vec![
            json!({"name": "a", "tags": {"env": "prod"}}),
            json!({"name": "b", "tags": {"env": "dev"}}),
            json!({"name": "c"}),
        ];
        let out = normalize(Shape::List, Fetched::Many(items), &[tag("env:prod")], &mut warnings);
        assert_eq!(out, json!([{"name": "a", "tags": {"env": "prod"}}]));
    }

    #[test]
    fn test_map_by_name_omits_nameless_items() {
        let mut warnings = Vec::new();
        let items = vec![
            json!({"name": "X", "id": "/x"}),
            json!({"id": "/nameless"}),
            json!({"name": "Y", "id": "/y"}),
        ];
        let out = normalize(Shape::MapByName, Fetched::Many(items), &[], &mut warnings);

        let keys: Vec<&String> = out.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["X", "Y"]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("/nameless"));
    }

    #[test]
    fn test_null_response_is_sentinel() {
        let mut warnings = Vec::new();
        assert_eq!(
            normalize(Shape::List, Fetched::One(Value::Null), &[], &mut warnings),
            json!([])
        );
    }
}
