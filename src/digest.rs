// src/digest.rs

//! Canonical-JSON digests.
//!
//! Cache keys and persisted records are identified by a `blake3` digest of
//! their canonical JSON rendering. Canonical here means: serialize through
//! `serde_json::Value`, whose object representation keeps keys sorted, so
//! two structurally equal values always produce identical bytes regardless
//! of field declaration order.

use blake3::Hasher;
use serde::Serialize;

use crate::errors::Result;

/// Render a serializable value as canonical JSON.
pub fn canonical_json(value: &impl Serialize) -> Result<String> {
    // Round-trip through Value: serde_json's map type is a BTreeMap, so
    // object keys come out sorted.
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

/// Hex digest of a raw string.
pub fn digest_str(input: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(input.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Hex digest of a serializable value's canonical JSON.
pub fn digest_value(value: &impl Serialize) -> Result<String> {
    Ok(digest_str(&canonical_json(value)?))
}

/// Digest identifying one cache entry: operation id plus key.
///
/// The operation id is hashed separately from the key bytes (with a NUL
/// separator) so `("ab", "c")` and `("a", "bc")` cannot collide.
pub fn digest_of(op_id: &str, key: &impl Serialize) -> Result<String> {
    let canon = canonical_json(key)?;
    let mut hasher = Hasher::new();
    hasher.update(op_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(canon.as_bytes());
    Ok(hasher.finalize().to_hex().to_string())
}
