//! Publish a working directory as a bundle.
//!
//! Scan the spec, plan storage, build the documents, then upload blobs,
//! external objects and finally the OCI image manifest that ties them
//! together. The manifest goes last so a tag never points at missing blobs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use bytes::Bytes;
use mops_store::{BundleRegistry, ExternalStore};
use serde::Serialize;
use tracing::{debug, info};

use crate::canonical;
use crate::config::{build_repository, BundleConfig};
use crate::digest::{sha256_digest, DIGEST_PREFIX};
use crate::error::{BundleError, BundleResult};
use crate::model::{
    layer_index_title, BundleRef, OciDescriptor, OciManifest, BUNDLE_MANIFEST_MEDIA_TYPE,
    BUNDLE_MANIFEST_TITLE, LAYER_INDEX_MEDIA_TYPE, OCI_EMPTY_CONFIG_BYTES,
    OCI_EMPTY_CONFIG_DIGEST, OCI_IMAGE_MANIFEST_MEDIA_TYPE,
};
use crate::planner::{create_bundle_manifest, create_layer_indexes, plan_storage, scan_directory};

pub const BUNDLE_NAME_ANNOTATION: &str = "org.modelops.bundle.name";
pub const BUNDLE_VERSION_ANNOTATION: &str = "org.modelops.bundle.version";
pub const BUNDLE_DESCRIPTION_ANNOTATION: &str = "org.modelops.bundle.description";

/// Media type of registry-stored file blobs.
pub const FILE_BLOB_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Defaults to the spec version.
    pub tag: Option<String>,
    /// Build every document and report the digest without uploading.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    /// Digest of the OCI image manifest; what `name@digest` refs pin.
    pub manifest_digest: String,
    /// Digest of the bundle manifest blob.
    pub bundle_manifest_digest: String,
    pub repository: String,
    pub tag: String,
    pub oras_files: usize,
    pub external_files: usize,
    /// Blobs actually sent, after skipping ones the registry already had.
    pub uploaded_blobs: usize,
    pub dry_run: bool,
}

impl PublishReceipt {
    /// Reference pinning exactly this publication.
    pub fn pinned_ref(&self, name: &str) -> BundleResult<BundleRef> {
        BundleRef::pinned(name, self.manifest_digest.as_str())
    }
}

struct Uploader<'a> {
    registry: &'a dyn BundleRegistry,
    repository: &'a str,
    sent: BTreeSet<String>,
}

impl Uploader<'_> {
    async fn blob(&mut self, digest: &str, data: Bytes) -> BundleResult<()> {
        if self.sent.contains(digest) || self.registry.blob_exists(self.repository, digest).await? {
            debug!(digest, "blob already present");
            return Ok(());
        }
        self.registry.put_blob(self.repository, digest, data).await?;
        self.sent.insert(digest.to_string());
        Ok(())
    }
}

async fn read_file(path: &Path) -> BundleResult<Bytes> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| BundleError::io(path, e))
}

/// Publish the bundle described by the spec file in `working_dir`.
pub async fn publish(
    working_dir: &Path,
    options: &PublishOptions,
    registry: &dyn BundleRegistry,
    external: &dyn ExternalStore,
    config: &BundleConfig,
) -> BundleResult<PublishReceipt> {
    config.validate()?;
    if !working_dir.is_dir() {
        return Err(BundleError::not_found(format!(
            "working directory {}",
            working_dir.display()
        )));
    }

    let mut spec = scan_directory(working_dir)?;
    if spec.oras_size_limit.is_none() {
        spec.oras_size_limit = Some(config.oras_size_limit);
    }
    let tag = options.tag.clone().unwrap_or_else(|| spec.version.clone());
    BundleRef::named(spec.name.as_str(), tag.as_str())?;
    let repository = build_repository(config, &spec.name)?;

    let plan = plan_storage(&spec, working_dir)?;
    let indexes = create_layer_indexes(&plan);
    let manifest = create_bundle_manifest(&spec, &indexes)?;
    let manifest_bytes = manifest.canonical_bytes()?;
    let bundle_manifest_digest = sha256_digest(&manifest_bytes);

    let mut index_blobs = Vec::with_capacity(indexes.len());
    let mut layers = vec![OciDescriptor::new(
        BUNDLE_MANIFEST_MEDIA_TYPE,
        bundle_manifest_digest.as_str(),
        manifest_bytes.len() as u64,
    )
    .with_title(BUNDLE_MANIFEST_TITLE)];
    for (name, index) in &indexes {
        let bytes = index.canonical_bytes()?;
        let digest = sha256_digest(&bytes);
        layers.push(
            OciDescriptor::new(LAYER_INDEX_MEDIA_TYPE, digest.as_str(), bytes.len() as u64)
                .with_title(layer_index_title(name)),
        );
        index_blobs.push((digest, bytes));
    }
    for file in plan.oras_files() {
        layers.push(
            OciDescriptor::new(
                FILE_BLOB_MEDIA_TYPE,
                format!("{}{}", DIGEST_PREFIX, file.sha256),
                file.size,
            )
            .with_title(file.artifact_path.as_str()),
        );
    }

    let mut annotations = BTreeMap::new();
    annotations.insert(BUNDLE_NAME_ANNOTATION.to_string(), spec.name.clone());
    annotations.insert(BUNDLE_VERSION_ANNOTATION.to_string(), spec.version.clone());
    if let Some(description) = &spec.description {
        annotations.insert(BUNDLE_DESCRIPTION_ANNOTATION.to_string(), description.clone());
    }
    let oci_bytes = canonical::to_vec(&OciManifest::new(layers, annotations))?;

    let mut receipt = PublishReceipt {
        manifest_digest: sha256_digest(&oci_bytes),
        bundle_manifest_digest,
        repository: repository.clone(),
        tag: tag.clone(),
        oras_files: plan.oras_files().count(),
        external_files: plan.external_files().count(),
        uploaded_blobs: 0,
        dry_run: options.dry_run,
    };

    if options.dry_run {
        info!(
            repository = %repository,
            tag = %tag,
            digest = %receipt.manifest_digest,
            oras_files = receipt.oras_files,
            external_files = receipt.external_files,
            "dry run: bundle not published"
        );
        return Ok(receipt);
    }

    let mut uploader = Uploader {
        registry,
        repository: &repository,
        sent: BTreeSet::new(),
    };

    for file in plan.oras_files() {
        let data = read_file(&file.src_path).await?;
        uploader
            .blob(&format!("{}{}", DIGEST_PREFIX, file.sha256), data)
            .await?;
    }

    for (file, uri, tier) in plan.external_files() {
        let data = read_file(&file.src_path).await?;
        external
            .put(uri, data, Some(file.sha256.as_str()), Some(tier.as_str()))
            .await?;
        debug!(path = %file.artifact_path, uri, "uploaded external object");
    }

    for (digest, bytes) in index_blobs {
        uploader.blob(&digest, Bytes::from(bytes)).await?;
    }
    uploader
        .blob(&receipt.bundle_manifest_digest, Bytes::from(manifest_bytes))
        .await?;
    uploader
        .blob(OCI_EMPTY_CONFIG_DIGEST, Bytes::from_static(OCI_EMPTY_CONFIG_BYTES))
        .await?;

    let stored_digest = registry
        .put_manifest(
            &repository,
            Some(&tag),
            OCI_IMAGE_MANIFEST_MEDIA_TYPE,
            Bytes::from(oci_bytes),
        )
        .await?;
    if stored_digest != receipt.manifest_digest {
        return Err(BundleError::Download {
            message: format!(
                "registry stored manifest as {}, expected {}",
                stored_digest, receipt.manifest_digest
            ),
        });
    }
    receipt.uploaded_blobs = uploader.sent.len();

    info!(
        repository = %repository,
        tag = %tag,
        digest = %receipt.manifest_digest,
        oras_files = receipt.oras_files,
        external_files = receipt.external_files,
        uploaded_blobs = receipt.uploaded_blobs,
        "published bundle"
    );
    Ok(receipt)
}
