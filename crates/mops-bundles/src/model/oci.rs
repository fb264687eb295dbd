//! Minimal OCI image manifest, enough to locate and publish bundle documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, BundleResult};
use crate::model::{
    BUNDLE_MANIFEST_MEDIA_TYPE, BUNDLE_MANIFEST_TITLE, OCI_EMPTY_CONFIG_DIGEST,
    OCI_EMPTY_CONFIG_MEDIA_TYPE, OCI_EMPTY_CONFIG_SIZE, OCI_IMAGE_MANIFEST_MEDIA_TYPE,
    TITLE_ANNOTATION,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl OciDescriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.annotations
            .insert(TITLE_ANNOTATION.to_string(), title.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.annotations.get(TITLE_ANNOTATION).map(String::as_str)
    }

    /// The `{}` config blob every bundle image manifest points at.
    pub fn empty_config() -> Self {
        Self::new(
            OCI_EMPTY_CONFIG_MEDIA_TYPE,
            OCI_EMPTY_CONFIG_DIGEST,
            OCI_EMPTY_CONFIG_SIZE,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: OciDescriptor,
    #[serde(default)]
    pub layers: Vec<OciDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl OciManifest {
    pub fn new(layers: Vec<OciDescriptor>, annotations: BTreeMap<String, String>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string()),
            config: OciDescriptor::empty_config(),
            layers,
            annotations,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> BundleResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BundleError::validation(format!("invalid OCI image manifest: {}", e)))
    }

    /// Descriptor of the bundle manifest blob.
    ///
    /// Title annotation first, then media type; layers before config.
    pub fn bundle_manifest_descriptor(&self) -> Option<&OciDescriptor> {
        let candidates = || self.layers.iter().chain(std::iter::once(&self.config));
        candidates()
            .find(|d| d.title() == Some(BUNDLE_MANIFEST_TITLE))
            .or_else(|| candidates().find(|d| d.media_type == BUNDLE_MANIFEST_MEDIA_TYPE))
    }
}
