//! Canonical content hashing
//!
//! A stable 128-bit digest over a canonical JSON form: object keys sorted
//! recursively, empty and whitespace-only values omitted. Semantically empty
//! content hashes to `None`, and `None == None` counts as equal for duplicate
//! suppression. The canonicalization is deterministic and idempotent.

use serde_json::Value;

use crate::domain::CvContent;

/// Digest a CV's content. Returns `None` when nothing meaningful remains
/// after canonicalization.
pub fn content_hash(content: &CvContent) -> Option<String> {
    let value = serde_json::to_value(content).ok()?;
    let canonical = canonicalize(&value)?;
    let mut encoded = String::new();
    write_canonical(&canonical, &mut encoded);
    Some(format!("{:x}", md5::compute(encoded.as_bytes())))
}

/// Equality under the hash, with empty == empty.
pub fn is_content_equal(a: &CvContent, b: &CvContent) -> bool {
    content_hash(a) == content_hash(b)
}

/// Drop empty values recursively; `None` means the whole value was empty.
fn canonicalize(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(Value::String(s.clone())),
        Value::Bool(_) | Value::Number(_) => Some(value.clone()),
        Value::Array(items) => {
            let kept: Vec<Value> = items.iter().filter_map(canonicalize).collect();
            if kept.is_empty() {
                None
            } else {
                Some(Value::Array(kept))
            }
        }
        Value::Object(map) => {
            let mut kept = serde_json::Map::new();
            // BTreeMap-style ordering via sorted key collection
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                if let Some(child) = canonicalize(&map[key]) {
                    kept.insert(key.clone(), child);
                }
            }
            if kept.is_empty() {
                None
            } else {
                Some(Value::Object(kept))
            }
        }
    }
}

/// Serialize with no whitespace and stable key order. `canonicalize` already
/// sorted object keys, so plain traversal preserves the order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&Value::String(s.clone()).to_string());
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
            out.push('{');
            for (i, (key, child)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(child, out);
            }
            out.push('}');
        }
    }
}
