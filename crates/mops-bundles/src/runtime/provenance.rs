//! Audit record tying a workdir to the bundle state it was materialized from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::error::{BundleError, BundleResult};
use crate::fsio::write_atomic;
use crate::model::{BundleRef, ResolvedBundle};
use crate::path_safety::RESERVED_PREFIX;

pub const PROVENANCE_FILE: &str = ".mops-manifest.json";

/// Provenance document. Carries no timestamp so identical inputs give identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub manifest_digest: String,
    pub media_type: String,
    pub role: String,
    pub roles: BTreeMap<String, Vec<String>>,
    pub layer_indexes: BTreeMap<String, String>,
    #[serde(rename = "ref")]
    pub bundle_ref: BundleRef,
}

impl Provenance {
    pub fn new(resolved: &ResolvedBundle, role: &str) -> Self {
        Self {
            manifest_digest: resolved.manifest_digest.clone(),
            media_type: resolved.media_type.clone(),
            role: role.to_string(),
            roles: resolved.roles.clone(),
            layer_indexes: resolved.layer_indexes.clone(),
            bundle_ref: resolved.bundle_ref.clone(),
        }
    }
}

fn provenance_path(dest: &Path) -> PathBuf {
    dest.join(RESERVED_PREFIX).join(PROVENANCE_FILE)
}

pub async fn write_provenance(dest: &Path, provenance: &Provenance) -> BundleResult<PathBuf> {
    let path = provenance_path(dest);
    write_atomic(&path, &canonical::to_vec(provenance)?).await?;
    Ok(path)
}

pub async fn read_provenance(dest: &Path) -> BundleResult<Provenance> {
    let path = provenance_path(dest);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BundleError::not_found(format!(
                "no provenance under {}",
                dest.display()
            )))
        }
        Err(e) => return Err(BundleError::io(&path, e)),
    };
    serde_json::from_slice(&bytes).map_err(|e| {
        BundleError::validation(format!("malformed provenance {}: {}", path.display(), e))
    })
}
