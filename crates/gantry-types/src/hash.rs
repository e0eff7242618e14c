//! Content hashing for step inputs and outputs
//!
//! Hashes are lowercase hex SHA-256 over canonical JSON: object keys sorted
//! at every depth, no insignificant whitespace. Two documents that compare
//! equal as JSON always hash the same.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("cannot hash value: {0}")]
pub struct HashError(#[from] serde_json::Error);

/// Hex-encoded SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Hash any serializable value in canonical JSON form
    pub fn of_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, HashError> {
        let value = canonicalize(serde_json::to_value(value)?);
        Ok(Self::of_bytes(&serde_json::to_vec(&value)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs and tables
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": null}});
        let b = json!({"a": {"x": null, "y": [1, 2]}, "b": 1});
        assert_eq!(
            ContentHash::of_json(&a).unwrap(),
            ContentHash::of_json(&b).unwrap()
        );
    }

    #[test]
    fn array_order_matters() {
        let a = ContentHash::of_json(&json!([1, 2])).unwrap();
        let b = ContentHash::of_json(&json!([2, 1])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            ContentHash::of_bytes(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(ContentHash::of_bytes(b"").short(), "e3b0c44298fc");
    }

    proptest! {
        #[test]
        fn hashing_is_deterministic(key in "[a-z]{1,8}", n in any::<i64>(), s in ".*") {
            let mut map = Map::new();
            map.insert(key, json!(n));
            map.insert("s".to_string(), json!(s));
            let doc = Value::Object(map);
            prop_assert_eq!(ContentHash::of_json(&doc).unwrap(), ContentHash::of_json(&doc).unwrap());
        }
    }
}
