//! Content model: references, documents and materialization entries.

pub mod entry;
pub mod manifest;
pub mod oci;
pub mod reference;
pub mod resolved;

pub use entry::{EntryKind, MatEntry};
pub use manifest::{BundleManifest, ExternalDescriptor, LayerIndex, LayerIndexEntry, StorageTier};
pub use oci::{OciDescriptor, OciManifest};
pub use reference::{BundleRef, RefMode};
pub use resolved::ResolvedBundle;

pub const BUNDLE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.modelops.bundle.manifest+json";
pub const LAYER_INDEX_MEDIA_TYPE: &str = "application/vnd.modelops.layer+json";

pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_EMPTY_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.empty.v1+json";
/// Digest of the two-byte `{}` config blob.
pub const OCI_EMPTY_CONFIG_DIGEST: &str =
    "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a";
pub const OCI_EMPTY_CONFIG_SIZE: u64 = 2;
pub const OCI_EMPTY_CONFIG_BYTES: &[u8] = b"{}";

pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";
pub const BUNDLE_MANIFEST_TITLE: &str = "bundle.manifest.json";

/// Title of a layer index blob.
pub fn layer_index_title(layer: &str) -> String {
    format!("layer.{}.json", layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_digest_matches_bytes() {
        assert_eq!(
            crate::digest::sha256_digest(OCI_EMPTY_CONFIG_BYTES),
            OCI_EMPTY_CONFIG_DIGEST
        );
        assert_eq!(OCI_EMPTY_CONFIG_BYTES.len() as u64, OCI_EMPTY_CONFIG_SIZE);
    }
}
