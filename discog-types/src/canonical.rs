//! Deterministic JSON serialization and content hashing.
//!
//! `serde_json::Value`'s object variant is backed by a `BTreeMap` unless the
//! `preserve_order` feature is enabled anywhere in the dependency graph; this
//! workspace never enables it, so `serde_json::to_vec` already yields
//! sorted-key, insignificant-whitespace-free output. `canonicalize` exists
//! as a named seam so that invariant is documented and tested rather than
//! implicit.

use serde::Serialize;
use sha2::{Digest, Sha256};

pub type ContentHash = [u8; 32];

#[derive(Debug, thiserror::Error)]
#[error("failed to serialize record to canonical JSON")]
pub struct CanonicalizeError(#[from] pub serde_json::Error);

/// Serializes `value` to canonical JSON bytes: sorted object keys, UTF-8, no
/// insignificant whitespace.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalizeError> {
    // Round-trip through `Value` rather than `serde_json::to_vec` directly:
    // `to_vec` would already be sorted-key and whitespace-free for any `T`
    // whose `Serialize` impl emits a map/struct, but going through `Value`
    // guarantees it even for `T`s that serialize nested maps with
    // non-deterministic iteration order (e.g. a `HashMap` field), since
    // `Value`'s own object representation re-sorts on the way in.
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

/// SHA-256 over canonical JSON bytes — the record's content hash.
pub fn content_hash(canonical_bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes);
    hasher.finalize().into()
}

/// Convenience: canonicalize then hash in one step.
pub fn canonicalize_and_hash<T: Serialize>(
    value: &T,
) -> Result<(Vec<u8>, ContentHash), CanonicalizeError> {
    let bytes = canonicalize(value)?;
    let hash = content_hash(&bytes);
    Ok((bytes, hash))
}

pub fn hash_to_hex(hash: &ContentHash) -> String {
    hex::encode(hash)
}

pub fn hash_from_hex(s: &str) -> Result<ContentHash, hex::FromHexError> {
    let bytes = hex::decode(s)?;
    bytes
        .try_into()
        .map_err(|_| hex::FromHexError::InvalidStringLength)
}
