//! Canonical JSON serialization and content hashing for request descriptors.
//!
//! Structured descriptors are turned into keys by serializing them to a
//! canonical form (object keys sorted at every depth, no insignificant
//! whitespace) and optionally hashing that form with SHA-256.
//!
//! # Determinism
//!
//! `{"a":1,"b":2}` and `{"b":2,"a":1}` produce the same canonical string, and
//! therefore the same key, regardless of how the map was built or which
//! `serde_json` map backend is compiled in.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Serializes `value` into its canonical compact JSON form.
///
/// Strings and numbers are rendered exactly as `serde_json` renders them, so
/// escaping rules match the wire format.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::with_capacity(128);
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_json_string(s, out),
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
            keys.sort_unstable();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    // Serializing a &str cannot fail.
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => out.push_str("\"\""),
    }
}

/// Returns the lowercase hex SHA-256 digest of `input` (64 characters).
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
