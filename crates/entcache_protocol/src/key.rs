//! Cache key derivation.
//!
//! Keys must be reproduced exactly:
//!
//! | Kind | Format |
//! |------|--------|
//! | Single record | `<endpoint>/<id>` |
//! | Query | `<endpoint>[:serialized(params)]` |
//! | List | `list:<endpoint>[:serialized(listParams)][:serialized(queryParams)]` |
//!
//! Parameters are serialized as compact JSON. `serde_json::Map` is
//! `BTreeMap`-backed (the `preserve_order` feature stays off), so object keys
//! come out sorted at every depth and two parameter maps with the same
//! content always produce the same key regardless of insertion order. A
//! bracketed part is omitted when the parameters are absent or empty.

use serde_json::{Map, Value};
use std::fmt::Display;

/// Query or list parameters.
pub type Params = Map<String, Value>;

/// Returns the key of a single record.
pub fn record_key(endpoint: &str, id: impl Display) -> String {
    format!("{endpoint}/{id}")
}

/// Returns the key of an arbitrary query.
pub fn query_key(endpoint: &str, params: Option<&Params>) -> String {
    let mut key = endpoint.to_string();
    push_params(&mut key, params);
    key
}

/// Returns the key of a list query.
pub fn list_key(endpoint: &str, list_params: Option<&Params>, query_params: Option<&Params>) -> String {
    let mut key = format!("list:{endpoint}");
    push_params(&mut key, list_params);
    push_params(&mut key, query_params);
    key
}

fn push_params(key: &mut String, params: Option<&Params>) {
    if let Some(params) = params.filter(|p| !p.is_empty()) {
        key.push(':');
        key.push_str(&canonical_json_map(params));
    }
}

/// Serializes a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

fn canonical_json_map(map: &Params) -> String {
    // String keys and JSON values always serialize.
    serde_json::to_string(map).unwrap_or_default()
}
