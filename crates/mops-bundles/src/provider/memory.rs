use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::digest::{sha256_digest, sha256_hex};
use crate::error::{BundleError, BundleResult};
use crate::model::{EntryKind, MatEntry, ResolvedBundle};
use crate::provider::ContentProvider;

/// Provider over a fixed set of entries held in memory.
///
/// Bytes are served by digest for ORAS entries and by URI for external
/// entries. [`StaticProvider::serve_external`] swaps the bytes behind a URI
/// without touching the declared hash.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    entries: Vec<MatEntry>,
    blobs: BTreeMap<String, Bytes>,
    objects: BTreeMap<String, Bytes>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_oras(mut self, path: &str, layer: &str, data: impl Into<Bytes>) -> BundleResult<Self> {
        let data = data.into();
        let digest = sha256_digest(&data);
        self.entries
            .push(MatEntry::oras(path, layer, &digest, data.len() as u64)?);
        self.blobs.insert(digest, data);
        Ok(self)
    }

    pub fn with_external(
        mut self,
        path: &str,
        layer: &str,
        uri: &str,
        data: impl Into<Bytes>,
    ) -> BundleResult<Self> {
        let data = data.into();
        self.entries.push(MatEntry::external(
            path,
            layer,
            uri,
            &sha256_hex(&data),
            data.len() as u64,
            None,
        )?);
        self.objects.insert(uri.to_string(), data);
        Ok(self)
    }

    /// Replace the bytes returned for `uri`.
    pub fn serve_external(mut self, uri: &str, data: impl Into<Bytes>) -> Self {
        self.objects.insert(uri.to_string(), data.into());
        self
    }

    pub fn entries(&self) -> &[MatEntry] {
        &self.entries
    }
}

#[async_trait]
impl ContentProvider for StaticProvider {
    fn iter_entries<'a>(
        &'a self,
        _resolved: &'a ResolvedBundle,
        layers: &'a [String],
    ) -> BoxStream<'a, BundleResult<MatEntry>> {
        let selected = layers.iter().flat_map(move |layer| {
            self.entries
                .iter()
                .filter(move |e| e.layer() == layer.as_str())
                .cloned()
                .map(Ok)
        });
        stream::iter(selected).boxed()
    }

    async fn fetch(&self, _resolved: &ResolvedBundle, entry: &MatEntry) -> BundleResult<Bytes> {
        let found = match entry.kind() {
            EntryKind::Oras => self.blobs.get(entry.digest()),
            EntryKind::External => entry.uri().and_then(|uri| self.objects.get(uri)),
        };
        found
            .cloned()
            .ok_or_else(|| BundleError::not_found(format!("content for '{}'", entry.path())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::collections::BTreeMap;

    fn assert_provider<P: ContentProvider>() {}

    #[test]
    fn test_is_a_provider() {
        assert_provider::<StaticProvider>();
        assert_provider::<crate::provider::RegistryContentProvider>();
    }

    #[tokio::test]
    async fn test_filters_by_layer() {
        let provider = StaticProvider::new()
            .with_oras("a.txt", "code", b"a".to_vec())
            .unwrap()
            .with_external("d.csv", "data", "s3://b/d.csv", b"d".to_vec())
            .unwrap();
        let resolved = ResolvedBundle {
            bundle_ref: crate::BundleRef::named("x", "1").unwrap(),
            repository: "modelops/bundles/x".into(),
            manifest_digest: format!("sha256:{}", "0".repeat(64)),
            media_type: crate::model::BUNDLE_MANIFEST_MEDIA_TYPE.into(),
            roles: BTreeMap::new(),
            layers: vec![],
            layer_indexes: BTreeMap::new(),
            external_index_present: false,
            total_size: 0,
            cache_dir: None,
        };

        let layers = vec!["data".to_string()];
        let entries: Vec<_> = provider.iter_entries(&resolved, &layers).try_collect().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path(), "d.csv");
        assert_eq!(&provider.fetch(&resolved, &entries[0]).await.unwrap()[..], b"d");
    }
}
