//! The unit of work handed from a content provider to the runtime.

use std::fmt;

use mops_store::ExternalUri;
use serde::{Deserialize, Serialize};

use crate::digest::{parse_digest, parse_sha256_hex, DIGEST_PREFIX};
use crate::error::BundleResult;
use crate::path_safety;

/// Where an entry's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Content-addressed registry blob.
    Oras,
    /// Object in external storage, materialized as a pointer unless prefetched.
    External,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oras => f.write_str("oras"),
            Self::External => f.write_str("external"),
        }
    }
}

/// A single file to materialize.
///
/// Only constructible through [`MatEntry::oras`] and [`MatEntry::external`],
/// which validate the path, the digest format and the external URI. `digest`
/// and `sha256` are always the same hash in its two spellings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatEntry {
    path: String,
    layer: String,
    kind: EntryKind,
    size: u64,
    digest: String,
    sha256: String,
    uri: Option<String>,
    tier: Option<String>,
}

impl MatEntry {
    /// Registry blob entry addressed by `sha256:<hex>`.
    pub fn oras(path: &str, layer: &str, digest: &str, size: u64) -> BundleResult<Self> {
        let path = path_safety::validate(path)?;
        let sha256 = parse_digest(digest)?.to_string();
        Ok(Self {
            path,
            layer: layer.to_string(),
            kind: EntryKind::Oras,
            size,
            digest: digest.to_string(),
            sha256,
            uri: None,
            tier: None,
        })
    }

    /// External object entry with its bare hex hash.
    pub fn external(
        path: &str,
        layer: &str,
        uri: &str,
        sha256: &str,
        size: u64,
        tier: Option<String>,
    ) -> BundleResult<Self> {
        let path = path_safety::validate(path)?;
        let sha256 = parse_sha256_hex(sha256)?.to_string();
        ExternalUri::parse(uri)?;
        Ok(Self {
            path,
            layer: layer.to_string(),
            kind: EntryKind::External,
            size,
            digest: format!("{}{}", DIGEST_PREFIX, sha256),
            sha256,
            uri: Some(uri.to_string()),
            tier,
        })
    }

    /// Normalized relative path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Declared size. ORAS entries without a recorded size report 0.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// `sha256:<hex>`.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Bare lowercase hex.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Always present for external entries.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn tier(&self) -> Option<&str> {
        self.tier.as_deref()
    }
}
