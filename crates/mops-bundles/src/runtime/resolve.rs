use mops_store::BundleRegistry;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{build_repository, BundleConfig};
use crate::digest::{parse_digest, sha256_digest};
use crate::error::{BundleError, BundleResult};
use crate::model::{
    BundleManifest, BundleRef, LayerIndex, OciManifest, RefMode, ResolvedBundle,
    BUNDLE_MANIFEST_MEDIA_TYPE,
};

#[derive(Deserialize)]
struct MediaTypeProbe {
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
}

/// Resolve `bundle_ref` to its manifest without touching any destination.
///
/// With `cache` set and a configured cache root, `<cache_root>/<hex>` is
/// created and reported as [`ResolvedBundle::cache_dir`].
pub async fn resolve(
    bundle_ref: &BundleRef,
    registry: &dyn BundleRegistry,
    config: &BundleConfig,
    cache: bool,
) -> BundleResult<ResolvedBundle> {
    let (repository, reference) = match bundle_ref.mode() {
        RefMode::Local(path) => {
            return Err(BundleError::validation(format!(
                "local bundle '{}' cannot be resolved from a registry",
                path.display()
            )))
        }
        RefMode::Digest {
            name: Some(name),
            digest,
        } => (build_repository(config, name)?, digest),
        RefMode::Digest { name: None, digest } => (config.registry_repo.clone(), digest),
        RefMode::Named { name, version } => (build_repository(config, name)?, version),
    };

    let top = registry
        .get_manifest(&repository, reference)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                BundleError::not_found(format!("bundle {} in {}", bundle_ref, repository))
            } else {
                BundleError::from(e)
            }
        })?;

    let manifest_digest = sha256_digest(&top);
    if let Some(expected) = bundle_ref.digest_ref() {
        if expected != manifest_digest {
            return Err(BundleError::validation(format!(
                "manifest digest mismatch for {}: registry returned {}",
                bundle_ref, manifest_digest
            )));
        }
    }

    let manifest = load_bundle_manifest(registry, &repository, &top).await?;
    let total_size = external_size(registry, &repository, &manifest).await;

    let cache_dir = match (&config.cache_root, cache) {
        (Some(root), true) => {
            let dir = root.join(parse_digest(&manifest_digest)?);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| BundleError::io(&dir, e))?;
            Some(dir)
        }
        _ => None,
    };

    debug!(
        bundle = %bundle_ref,
        repository = %repository,
        digest = %manifest_digest,
        layers = manifest.layers.len(),
        "resolved bundle"
    );

    Ok(ResolvedBundle {
        bundle_ref: bundle_ref.clone(),
        repository,
        manifest_digest,
        media_type: manifest.media_type,
        roles: manifest.roles,
        layers: manifest.layers.keys().cloned().collect(),
        layer_indexes: manifest.layers,
        external_index_present: manifest.external_index_present,
        total_size,
        cache_dir,
    })
}

/// Follow an OCI image manifest to the bundle manifest blob, or accept a
/// bundle manifest served directly.
async fn load_bundle_manifest(
    registry: &dyn BundleRegistry,
    repository: &str,
    top: &[u8],
) -> BundleResult<BundleManifest> {
    let probe: MediaTypeProbe = serde_json::from_slice(top)
        .map_err(|e| BundleError::validation(format!("invalid manifest JSON: {}", e)))?;
    if probe.media_type.as_deref() == Some(BUNDLE_MANIFEST_MEDIA_TYPE) {
        return BundleManifest::from_slice(top);
    }

    let oci = OciManifest::from_slice(top)?;
    let descriptor = oci.bundle_manifest_descriptor().ok_or_else(|| {
        BundleError::validation(format!(
            "OCI manifest in {} has no bundle manifest descriptor",
            repository
        ))
    })?;

    let blob = registry
        .get_blob(repository, &descriptor.digest)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                BundleError::not_found(format!(
                    "bundle manifest blob {} in {}",
                    descriptor.digest, repository
                ))
            } else {
                BundleError::from(e)
            }
        })?;

    let actual = sha256_digest(&blob);
    if actual != descriptor.digest {
        return Err(BundleError::validation(format!(
            "bundle manifest blob does not match its descriptor: expected {}, got {}",
            descriptor.digest, actual
        )));
    }
    BundleManifest::from_slice(&blob)
}

async fn external_size(
    registry: &dyn BundleRegistry,
    repository: &str,
    manifest: &BundleManifest,
) -> u64 {
    let mut total = 0;
    for (layer, digest) in &manifest.layers {
        let index = match registry.get_blob(repository, digest).await {
            Ok(bytes) => LayerIndex::from_slice(&bytes),
            Err(e) => Err(BundleError::from(e)),
        };
        match index {
            Ok(index) => total += index.external_size(),
            Err(e) => warn!(layer = %layer, error = %e, "skipping layer index in size estimate"),
        }
    }
    total
}
