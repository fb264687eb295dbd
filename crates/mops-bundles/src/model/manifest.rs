//! Layer index and bundle manifest documents.
//!
//! Digests are never stored in the documents themselves; they are recomputed
//! from the canonical form on every call.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::digest::parse_digest;
use crate::error::{BundleError, BundleResult};
use crate::model::entry::MatEntry;
use crate::model::{BUNDLE_MANIFEST_MEDIA_TYPE, LAYER_INDEX_MEDIA_TYPE};

/// External storage access tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    #[default]
    Hot,
    Cool,
    Archive,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Cool => "cool",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of externally stored content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDescriptor {
    pub uri: String,
    /// Bare lowercase hex, no `sha256:` prefix.
    pub sha256: String,
    pub size: u64,
    /// Access hint only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

/// One file in a layer index. Exactly one of `digest` or `external` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerIndexEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalDescriptor>,
}

impl LayerIndexEntry {
    pub fn oras(path: impl Into<String>, layer: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            layer: Some(layer.into()),
            digest: Some(digest.into()),
            size: Some(size),
            external: None,
        }
    }

    pub fn external(path: impl Into<String>, layer: impl Into<String>, external: ExternalDescriptor) -> Self {
        Self {
            path: path.into(),
            layer: Some(layer.into()),
            digest: None,
            size: None,
            external: Some(external),
        }
    }

    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }
}

/// Manifest of one layer's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerIndex {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    pub entries: Vec<LayerIndexEntry>,
}

impl LayerIndex {
    /// Build an index with entries sorted by path.
    pub fn new(layer: impl Into<String>, mut entries: Vec<LayerIndexEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            media_type: LAYER_INDEX_MEDIA_TYPE.to_string(),
            layer: Some(layer.into()),
            entries,
        }
    }

    /// Parse an index document without validating entries.
    pub fn from_slice(bytes: &[u8]) -> BundleResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BundleError::validation(format!("invalid layer index JSON: {}", e)))
    }

    /// Canonical bytes with entries sorted by path. What gets hashed and published.
    pub fn canonical_bytes(&self) -> BundleResult<Vec<u8>> {
        let mut sorted = self.clone();
        sorted.entries.sort_by(|a, b| a.path.cmp(&b.path));
        canonical::to_vec(&sorted)
    }

    /// `sha256:` digest of the canonical form.
    pub fn digest(&self) -> BundleResult<String> {
        Ok(crate::digest::sha256_digest(&self.canonical_bytes()?))
    }

    /// Validate the document for `layer` and convert it to materialization entries.
    ///
    /// Rejects a wrong media type, entries claiming another layer, entries with
    /// neither or both of `digest`/`external`, malformed digests and unsafe paths.
    pub fn mat_entries(&self, layer: &str) -> BundleResult<Vec<MatEntry>> {
        if self.media_type != LAYER_INDEX_MEDIA_TYPE {
            return Err(BundleError::validation(format!(
                "invalid mediaType for layer '{}': expected {}, got '{}'",
                layer, LAYER_INDEX_MEDIA_TYPE, self.media_type
            )));
        }

        self.entries
            .iter()
            .map(|entry| {
                if let Some(claimed) = entry.layer.as_deref() {
                    if claimed != layer {
                        return Err(BundleError::validation(format!(
                            "entry layer mismatch in '{}': entry '{}' says '{}'",
                            layer, entry.path, claimed
                        )));
                    }
                }

                match (&entry.digest, &entry.external) {
                    (Some(digest), None) => {
                        MatEntry::oras(&entry.path, layer, digest, entry.size.unwrap_or(0))
                    }
                    (None, Some(ext)) => MatEntry::external(
                        &entry.path,
                        layer,
                        &ext.uri,
                        &ext.sha256,
                        ext.size,
                        ext.tier.clone(),
                    ),
                    _ => Err(BundleError::validation(format!(
                        "entry must have exactly one of 'digest' or 'external' for path '{}' in layer '{}'",
                        entry.path, layer
                    ))),
                }
            })
            .collect()
    }

    /// Sum of external entry sizes.
    pub fn external_size(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|e| e.external.as_ref())
            .map(|ext| ext.size)
            .sum()
    }
}

/// Top-level bundle document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub roles: BTreeMap<String, Vec<String>>,
    /// Layer name -> layer index digest.
    pub layers: BTreeMap<String, String>,
    #[serde(default)]
    pub external_index_present: bool,
}

impl BundleManifest {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        roles: BTreeMap<String, Vec<String>>,
        layers: BTreeMap<String, String>,
        external_index_present: bool,
    ) -> Self {
        Self {
            media_type: BUNDLE_MANIFEST_MEDIA_TYPE.to_string(),
            name: name.into(),
            version: version.into(),
            description: None,
            roles,
            layers,
            external_index_present,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Parse and validate a bundle manifest document.
    pub fn from_slice(bytes: &[u8]) -> BundleResult<Self> {
        let manifest: Self = serde_json::from_slice(bytes)
            .map_err(|e| BundleError::validation(format!("invalid bundle manifest JSON: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Media type and digest formats. Role/layer consistency is checked when a role is selected.
    pub fn validate(&self) -> BundleResult<()> {
        if self.media_type != BUNDLE_MANIFEST_MEDIA_TYPE {
            return Err(BundleError::validation(format!(
                "invalid manifest mediaType: expected {}, got '{}'",
                BUNDLE_MANIFEST_MEDIA_TYPE, self.media_type
            )));
        }
        for (layer, digest) in &self.layers {
            parse_digest(digest).map_err(|_| {
                BundleError::validation(format!(
                    "invalid index digest for layer '{}': '{}'",
                    layer, digest
                ))
            })?;
        }
        Ok(())
    }

    pub fn canonical_bytes(&self) -> BundleResult<Vec<u8>> {
        canonical::to_vec(self)
    }

    pub fn digest(&self) -> BundleResult<String> {
        canonical::digest(self)
    }
}
