//! Selector value extraction.
//!
//! Pulls one string per selector out of a request. Extraction never fails:
//! anything absent or unparseable becomes the empty string.

use crate::config::{SelectorDef, SourceType};
use crate::request::MockRequest;
use jsonpath_rust::JsonPath;
use serde_json::Value;
use std::collections::HashMap;

/// Selector name to extracted value, built once per request.
pub type ExtractedValues = HashMap<String, String>;

/// Extract every selector's value from the request.
///
/// `path_params` are consulted before the request's own router params.
pub fn extract_values(
    request: &MockRequest,
    selectors: &[SelectorDef],
    path_params: &HashMap<String, String>,
) -> ExtractedValues {
    let mut values = HashMap::with_capacity(selectors.len());
    // Parsed lazily so the body is decoded at most once per call.
    let mut body: Option<Option<Value>> = None;
    let mut query: Option<HashMap<String, String>> = None;

    for sel in selectors {
        let value = match &sel.source {
            SourceType::Body => {
                let json = body.get_or_insert_with(|| serde_json::from_slice(&request.body).ok());
                json.as_ref()
                    .map(|json| json_lookup(json, &sel.key))
                    .unwrap_or_default()
            }
            SourceType::Header => request.header(&sel.key).unwrap_or_default().to_string(),
            SourceType::Query => query
                .get_or_insert_with(|| request.query_params())
                .get(&sel.key)
                .cloned()
                .unwrap_or_default(),
            SourceType::Path => path_params
                .get(&sel.key)
                .filter(|v| !v.is_empty())
                .or_else(|| request.path_params.get(&sel.key))
                .cloned()
                .unwrap_or_default(),
            SourceType::Unknown(_) => String::new(),
        };
        values.insert(sel.name.clone(), value);
    }

    values
}

/// Look up a key in a JSON document and render it as a string.
///
/// Keys starting with `$` are JSONPath expressions. Anything else is a
/// dotted path: each segment names an object member, or indexes an array
/// when the current value is one (`items.0.sku`).
pub fn json_lookup(json: &Value, key: &str) -> String {
    if key.starts_with('$') {
        return json_path_lookup(json, key);
    }

    key.split('.')
        .filter(|s| !s.is_empty())
        .try_fold(json, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .map(value_to_string)
        .unwrap_or_default()
}

fn json_path_lookup(json: &Value, expr: &str) -> String {
    let path = match JsonPath::try_from(expr) {
        Ok(p) => p,
        Err(_) => return String::new(),
    };

    let found = match path.find(json) {
        Value::Array(mut items) => {
            if items.is_empty() {
                return String::new();
            }
            items.swap_remove(0)
        }
        other => other,
    };

    value_to_string(&found)
}

/// Strings render raw, null renders empty, everything else as JSON text.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
