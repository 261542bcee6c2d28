//! Byte-stable canonical encoding and SHA-256 fingerprinting.
//!
//! The canonical form recursively sorts mapping keys, preserves array order,
//! and renders numbers using their natural decimal string form. It is the
//! only encoding that ever participates in a fingerprint: two values that
//! are canonical-equal always produce the same fingerprint, regardless of
//! the order their fields were constructed in.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("failed to serialize value to JSON: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type CanonicalResult<T> = Result<T, CanonicalError>;

/// Produce the canonical byte encoding of a JSON value.
pub fn canonicalize(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out.into_bytes()
}

/// Serialize `value` and produce its canonical byte encoding.
pub fn canonicalize_value<T: Serialize>(value: &T) -> CanonicalResult<Vec<u8>> {
    let json = serde_json::to_value(value)?;
    Ok(canonicalize(&json))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json's string serializer already produces the minimal,
            // correctly-escaped JSON string form; reuse it rather than
            // hand-rolling escaping rules.
            out.push_str(&serde_json::to_string(s).expect("string serialization cannot fail"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialization cannot fail"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// SHA-256 fingerprint of a value's canonical encoding, as lower-case hex.
pub fn fingerprint(value: &Value) -> String {
    let bytes = canonicalize(value);
    let digest = Sha256::digest(&bytes);
    hex_lower(&digest)
}

/// Serialize and fingerprint in one step.
pub fn fingerprint_value<T: Serialize>(value: &T) -> CanonicalResult<String> {
    let json = serde_json::to_value(value)?;
    Ok(fingerprint(&json))
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_key_order_does_not_affect_encoding() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn array_order_is_preserved() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let a = json!({"outer": {"z": 1, "a": 2}, "first": true});
        let b = json!({"first": true, "outer": {"a": 2, "z": 1}});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn decimal_strings_round_trip_verbatim() {
        let v = json!({"amount": "525.0000000"});
        let bytes = canonicalize(&v);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"525.0000000\""));
    }

    #[test]
    fn fingerprint_is_stable_across_key_order() {
        let a = json!({"checksum_input": {"y": 1, "x": 2}});
        let b = json!({"checksum_input": {"x": 2, "y": 1}});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_differs_on_array_shuffle() {
        let a = json!({"items": [1, 2]});
        let b = json!({"items": [2, 1]});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
