//! Canonical hashing
//!
//! Signed data is hashed over a canonical JSON serialization: object keys are
//! sorted recursively and no insignificant whitespace is emitted, so the same
//! logical value always hashes to the same digest regardless of how it was
//! built or transported.

use ring::digest::{digest, SHA256};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// Name of the digest used for data hashes
pub const DATA_HASH_ALGORITHM: &str = "SHA-256";

/// SHA-256 of raw bytes
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest(&SHA256, data).as_ref());
    out
}

/// Lowercase hex SHA-256 of raw bytes
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Short fingerprint of a public key (first 16 hex chars of its SHA-256)
pub fn public_key_hash(public_key: &[u8]) -> String {
    let mut full = sha256_hex(public_key);
    full.truncate(16);
    full
}

/// Serialize a value to canonical JSON bytes
pub fn canonical_bytes<T: Serialize + ?Sized>(data: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(data)?;
    let canonical = canonicalize(value);
    Ok(serde_json::to_vec(&canonical)?)
}

/// Hash a value over its canonical serialization
pub fn canonical_hash<T: Serialize + ?Sized>(data: &T) -> Result<String> {
    Ok(sha256_hex(&canonical_bytes(data)?))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonicalize(inner));
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
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_public_key_hash_length() {
        assert_eq!(public_key_hash(b"some key").len(), 16);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": "v"}});
        let b = json!({"a": {"x": "v", "y": [1, 2]}, "b": 1});
        assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
        assert_eq!(canonical_bytes(&a).unwrap(), br#"{"a":{"x":"v","y":[1,2]},"b":1}"#.to_vec());
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            canonical_hash(&json!([1, 2])).unwrap(),
            canonical_hash(&json!([2, 1])).unwrap()
        );
    }

    proptest! {
        #[test]
        fn prop_insertion_order_independent(entries in proptest::collection::btree_map("[a-z]{1,6}", 0i64..1000, 1..8)) {
            let mut forward = Map::new();
            for (k, v) in entries.iter() {
                forward.insert(k.clone(), json!(v));
            }
            let mut reverse = Map::new();
            for (k, v) in entries.iter().rev() {
                reverse.insert(k.clone(), json!(v));
            }
            prop_assert_eq!(
                canonical_hash(&Value::Object(forward)).unwrap(),
                canonical_hash(&Value::Object(reverse)).unwrap()
            );
        }
    }
}
