//! SHA-256 digests in the `sha256:<64 lowercase hex>` form.

use std::io::Read;

use sha2::{Digest, Sha256};

use crate::error::{BundleError, BundleResult};

pub const DIGEST_PREFIX: &str = "sha256:";

/// Bare lowercase hex SHA-256 of a reader, streamed in 8 KiB chunks.
pub fn sha256_hex_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Bare lowercase hex SHA-256 of in-memory bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// `sha256:`-prefixed digest of in-memory bytes.
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("{}{}", DIGEST_PREFIX, sha256_hex(bytes))
}

/// True for exactly 64 lowercase hex characters.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Validate a `sha256:` digest and return its bare hex part.
pub fn parse_digest(digest: &str) -> BundleResult<&str> {
    digest
        .strip_prefix(DIGEST_PREFIX)
        .filter(|hex| is_sha256_hex(hex))
        .ok_or_else(|| {
            BundleError::validation(format!(
                "invalid digest '{}': expected 'sha256:<64 lowercase hex>'",
                digest
            ))
        })
}

/// Validate a bare hex SHA-256.
pub fn parse_sha256_hex(value: &str) -> BundleResult<&str> {
    if is_sha256_hex(value) {
        Ok(value)
    } else {
        Err(BundleError::validation(format!(
            "invalid sha256 '{}': expected 64 lowercase hex characters",
            value
        )))
    }
}
