//! Cache Key Module
//!
//! Builds deterministic cache keys from a resource name, an optional owner
//! and optional query parameters.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, Result};

/// Prefix shared by every key built for API responses.
pub const KEY_PREFIX: &str = "api";

// == Build Key ==
/// Builds the cache key `api:{resource}[:user:{owner}][:{params}]`.
///
/// `params` must serialize to a JSON object. Object keys are emitted in sorted
/// order at every depth and `null` values are dropped, so two logically equal
/// requests always map to the same key. An absent or empty parameter map omits
/// the trailing segment.
///
/// `resource` and `owner_id` are percent-encoded, so neither can contain the
/// `:` separator and no owner can forge another owner's or request's key.
///
/// # Errors
/// Returns [`CacheError::KeySerialization`] when the parameters cannot be
/// serialized or are not a map.
pub fn build_key<P>(resource: &str, owner_id: Option<&str>, params: Option<&P>) -> Result<String>
where
    P: Serialize + ?Sized,
{
    let mut key = format!("{}:{}", KEY_PREFIX, encode_segment(resource));

    if let Some(owner) = owner_id {
        key.push_str(":user:");
        key.push_str(&encode_segment(owner));
    }

    if let Some(params) = params {
        let canonical = canonical_params(params)?;
        if !canonical.is_empty() {
            key.push(':');
            key.push_str(&canonical);
        }
    }

    Ok(key)
}

/// Escapes a key segment so it never contains `:`.
pub fn encode_segment(segment: &str) -> Cow<'_, str> {
    urlencoding::encode(segment)
}

/// Serializes parameters into a canonical JSON object string.
///
/// Returns an empty string for an empty map.
fn canonical_params<P>(params: &P) -> Result<String>
where
    P: Serialize + ?Sized,
{
    let value = serde_json::to_value(params)
        .map_err(|e| CacheError::KeySerialization(e.to_string()))?;

    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(CacheError::KeySerialization(format!(
                "parameters must be a map, got {}",
                json_kind(&other)
            )))
        }
    };

    let sorted: BTreeMap<String, Value> = map
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, canonicalize(v)))
        .collect();

    if sorted.is_empty() {
        return Ok(String::new());
    }

    serde_json::to_string(&sorted).map_err(|e| CacheError::KeySerialization(e.to_string()))
}

/// Rebuilds nested objects with sorted keys.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
