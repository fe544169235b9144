//! Canonical JSON encoding and args hashing
//!
//! Two processes computing a hash over "the same" arguments must agree
//! byte-for-byte, so the encoding sorts object keys recursively and emits
//! no insignificant whitespace. Key order in the incoming JSON is
//! irrelevant; numeric and string formatting follow `serde_json`'s
//! compact rendering.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic compact encoding of a JSON value.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Display of a JSON string value yields the escaped form.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_canonical(child, out);
                }
            }
            out.push('}');
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 of the canonical encoding of `args`.
pub fn args_hash(args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(args).as_bytes());
    hex::encode(hasher.finalize())
}
