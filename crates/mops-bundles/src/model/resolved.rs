use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::reference::BundleRef;

/// Result of resolving a [`BundleRef`]. Re-derived on every resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedBundle {
    #[serde(rename = "ref")]
    pub bundle_ref: BundleRef,
    /// Registry repository the manifest was read from.
    pub repository: String,
    /// `sha256:` of the top-level manifest bytes.
    pub manifest_digest: String,
    pub media_type: String,
    pub roles: BTreeMap<String, Vec<String>>,
    /// Layer names, sorted.
    pub layers: Vec<String>,
    /// Layer name -> layer index digest.
    pub layer_indexes: BTreeMap<String, String>,
    pub external_index_present: bool,
    /// Sum of external entry sizes seen while resolving. Best effort.
    pub total_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl ResolvedBundle {
    pub fn role_names(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }

    pub fn has_layer(&self, layer: &str) -> bool {
        self.layer_indexes.contains_key(layer)
    }
}
