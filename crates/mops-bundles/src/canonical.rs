//! Canonical JSON (RFC 8785) for every document whose digest must reproduce.
//!
//! Keys sorted lexicographically, no insignificant whitespace, UTF-8.

use serde::Serialize;

use crate::digest::sha256_digest;
use crate::error::{BundleError, BundleResult};

/// Serialize a value to canonical JSON bytes.
///
/// ```
/// use mops_bundles::canonical;
/// use serde_json::json;
///
/// let bytes = canonical::to_vec(&json!({"b": 2, "a": 1})).unwrap();
/// assert_eq!(bytes, br#"{"a":1,"b":2}"#);
/// ```
pub fn to_vec<T: Serialize>(value: &T) -> BundleResult<Vec<u8>> {
    serde_jcs::to_vec(value)
        .map_err(|e| BundleError::validation(format!("failed to serialize canonical json: {}", e)))
}

/// `sha256:` digest over the canonical form.
pub fn digest<T: Serialize>(value: &T) -> BundleResult<String> {
    Ok(sha256_digest(&to_vec(value)?))
}
