//! Cache tag and key definitions.
//!
//! A [`Tag`] scopes every entry written by one repository; a [`CacheKey`] is
//! the SHA-256 digest of one read call's operation, arguments and query shape.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::error::DomainError;

/// Identifier scoping a family of cache entries to one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("cache tag must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed-length (64 hex characters) digest identifying one cached read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const FIELD_SEPARATOR: u8 = 0x1f;

/// Derive the cache key for a read.
///
/// `params` must already be plain data with defaults resolved. Object keys
/// inside `params` are encoded in sorted order, array order is kept.
pub fn derive_key(operation: &str, params: &[Value], query_signature: &str) -> CacheKey {
    let mut encoded_params = String::new();
    write_canonical(&Value::Array(params.to_vec()), &mut encoded_params);

    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(encoded_params.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(query_signature.as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
}

/// Compact JSON with object keys sorted, independent of how the map type
/// orders its entries.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            out.push('{');
            for (index, (name, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
