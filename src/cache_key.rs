use serde::Serialize;
use sha2::Digest as _;

use crate::Result;

pub const STREAMING_KEY_PREFIX: &str = "stream:";

/// Lowercase hex SHA-256 of the canonical JSON encoding of `payload`.
///
/// Object keys are sorted at every depth before hashing, so two payloads with
/// the same content hash identically regardless of how they were built.
pub fn derive_cache_key(payload: &serde_json::Value) -> String {
    let mut canonical = String::new();
    write_canonical_json(payload, &mut canonical);

    let mut hasher = sha2::Sha256::new();
    hasher.update(canonical.as_bytes());
    hex_lower(&hasher.finalize())
}

pub fn derive_streaming_cache_key(payload: &serde_json::Value) -> String {
    format!("{STREAMING_KEY_PREFIX}{}", derive_cache_key(payload))
}

pub fn cache_key_for<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    Ok(derive_cache_key(&serde_json::to_value(payload)?))
}

pub fn streaming_cache_key_for<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    Ok(derive_streaming_cache_key(&serde_json::to_value(payload)?))
}

fn write_canonical_json(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (idx, (key, value)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical_json(value, out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_json_string(raw: &str, out: &mut String) {
    out.push_str(&serde_json::Value::String(raw.to_string()).to_string());
}

fn hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len().saturating_mul(2));
    for &byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
