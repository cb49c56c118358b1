//! Key and Value Codec
//!
//! Keys are `<namespace>:<canonical-args>`. The canonical form carries an
//! explicit type tag for every value so that `"1"` and `1` never collide,
//! and object fields are emitted in sorted order so that field order never
//! matters. Long canonical forms are replaced with `#<sha256>`.
//!
//! Values are stored as JSON. JSON only ever rebuilds plain data, so a
//! tampered storage directory cannot make deserialization execute code.

use std::fmt::Write as _;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// Canonical arguments longer than this are hashed
pub const MAX_INLINE_KEY_LEN: usize = 128;

/// Separator between namespace and argument part of a key
pub const NAMESPACE_SEPARATOR: char = ':';

/// Stateless encoder for keys and payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyCodec;

impl KeyCodec {
    /// Encode a logical call (`namespace` + `args`) into a cache key
    pub fn encode<A>(namespace: &str, args: &A) -> Result<String>
    where
        A: Serialize + ?Sized,
    {
        Self::check_namespace(namespace)?;
        let value = serde_json::to_value(args)
            .map_err(|e| CacheError::InvalidKey(format!("unencodable arguments: {}", e)))?;

        let mut canonical = String::new();
        write_canonical(&mut canonical, &value);

        if canonical.len() > MAX_INLINE_KEY_LEN {
            canonical = format!("#{}", sha256_hex(canonical.as_bytes()));
        }

        Ok(format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, canonical))
    }

    /// Namespace part of an encoded key
    pub fn namespace_of(key: &str) -> Option<&str> {
        key.split_once(NAMESPACE_SEPARATOR).map(|(ns, _)| ns)
    }

    fn check_namespace(namespace: &str) -> Result<()> {
        if namespace.is_empty() {
            return Err(CacheError::InvalidKey("empty namespace".into()));
        }
        if namespace.contains(NAMESPACE_SEPARATOR) {
            return Err(CacheError::InvalidKey(format!(
                "namespace '{}' must not contain '{}'",
                namespace, NAMESPACE_SEPARATOR
            )));
        }
        Ok(())
    }

    /// Serialize a value for byte-level tiers
    pub fn serialize<V: Serialize>(value: &V) -> Result<Bytes> {
        let buf = serde_json::to_vec(value)?;
        Ok(Bytes::from(buf))
    }

    /// Deserialize a value written by [`KeyCodec::serialize`]
    pub fn deserialize<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Stable file-system safe name for a key
    pub fn storage_name(key: &str) -> String {
        sha256_hex(key.as_bytes())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push('n'),
        Value::Bool(b) => {
            let _ = write!(out, "b:{}", b);
        }
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                let _ = write!(out, "u:{}", u);
            } else if let Some(i) = n.as_i64() {
                let _ = write!(out, "i:{}", i);
            } else {
                let _ = write!(out, "f:{}", n);
            }
        }
        Value::String(s) => {
            // length prefix keeps delimiters inside strings unambiguous
            let _ = write!(out, "s{}:{}", s.len(), s);
        }
        Value::Array(items) => {
            out.push_str("a[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push_str("o{");
            for (i, (name, item)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:{}=", name.len(), name);
                write_canonical(out, item);
            }
            out.push('}');
        }
    }
}

/// Fast non-cryptographic hash (FxHash algorithm), used for record checksums
#[inline]
pub fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

// =============================================================================
// Tests
// =============================================================================
