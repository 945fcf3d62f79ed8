// src/utils/serialization.rs
//! Serialization utilities for the trust engine.
//!
//! Provides:
//! - JSON helpers used by stores and keystores
//! - The canonical JSON form that signatures are computed over
//! - A serde adapter that stores byte vectors as base64 strings

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

/// Serializes a value to pretty JSON bytes for storage.
///
/// # Arguments
/// * `data` - The value to serialize (must implement `Serialize`)
///
/// # Returns
/// - `Ok(Vec<u8>)` with the JSON representation on success
/// - `Err(serde_json::Error)` if serialization fails
pub fn serialize<T: Serialize>(data: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(data)
}

/// Deserializes a value from JSON bytes.
pub fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Produces canonical JSON bytes for `data`.
///
/// Object keys are sorted recursively and no insignificant whitespace is
/// emitted, so the output depends only on the logical content of `data`.
pub fn canonical_json<T: Serialize>(data: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(data)?;
    serde_json::to_vec(&sort_keys(value))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Serde adapter: `Vec<u8>` as standard base64.
///
/// Use with `#[serde(with = "crate::utils::serialization::base64_bytes")]`.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::decode(encoded).map_err(|e| serde::de::Error::custom(format!("invalid base64: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"z": true, "y": [ {"d": 1, "c": 2} ]}});
        let bytes = canonical_json(&a).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"y":[{"c":2,"d":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_canonical_json_is_independent_of_insertion_order() {
        let mut first = Map::new();
        first.insert("x".into(), json!(1));
        first.insert("w".into(), json!(2));
        let mut second = Map::new();
        second.insert("w".into(), json!(2));
        second.insert("x".into(), json!(1));

        assert_eq!(
            canonical_json(&Value::Object(first)).unwrap(),
            canonical_json(&Value::Object(second)).unwrap()
        );
    }
}
