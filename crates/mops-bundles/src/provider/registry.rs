use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use mops_store::{BundleRegistry, ExternalStore};
use tracing::debug;

use crate::digest::sha256_digest;
use crate::error::{BundleError, BundleResult};
use crate::model::{EntryKind, LayerIndex, MatEntry, ResolvedBundle};
use crate::provider::ContentProvider;

/// Provider backed by a bundle registry and an external object store.
///
/// Layer indexes are fetched from `resolved.repository` one layer at a time
/// as the stream is polled.
#[derive(Clone)]
pub struct RegistryContentProvider {
    registry: Arc<dyn BundleRegistry>,
    external: Arc<dyn ExternalStore>,
}

impl RegistryContentProvider {
    pub fn new(registry: Arc<dyn BundleRegistry>, external: Arc<dyn ExternalStore>) -> Self {
        Self { registry, external }
    }

    async fn layer_entries(&self, resolved: &ResolvedBundle, layer: &str) -> BundleResult<Vec<MatEntry>> {
        let index_digest = resolved.layer_indexes.get(layer).ok_or_else(|| {
            BundleError::validation(format!("resolved bundle has no index for layer '{}'", layer))
        })?;

        let payload = self
            .registry
            .get_blob(&resolved.repository, index_digest)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    BundleError::not_found(format!(
                        "index {} for layer '{}' in {}",
                        index_digest, layer, resolved.repository
                    ))
                } else {
                    BundleError::from(e)
                }
            })?;

        let actual = sha256_digest(&payload);
        if &actual != index_digest {
            return Err(BundleError::validation(format!(
                "index for layer '{}' does not match its digest: expected {}, got {}",
                layer, index_digest, actual
            )));
        }

        let entries = LayerIndex::from_slice(&payload)?.mat_entries(layer)?;
        debug!(layer, entries = entries.len(), "read layer index");
        Ok(entries)
    }
}

#[async_trait]
impl ContentProvider for RegistryContentProvider {
    fn iter_entries<'a>(
        &'a self,
        resolved: &'a ResolvedBundle,
        layers: &'a [String],
    ) -> BoxStream<'a, BundleResult<MatEntry>> {
        stream::iter(layers)
            .then(move |layer| self.layer_entries(resolved, layer))
            .map_ok(|entries| stream::iter(entries.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    async fn fetch(&self, resolved: &ResolvedBundle, entry: &MatEntry) -> BundleResult<Bytes> {
        match entry.kind() {
            EntryKind::Oras => Ok(self
                .registry
                .get_blob(&resolved.repository, entry.digest())
                .await?),
            EntryKind::External => {
                let uri = entry.uri().ok_or_else(|| {
                    BundleError::validation(format!("external entry '{}' has no uri", entry.path()))
                })?;
                Ok(self.external.get(uri).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExternalDescriptor, LayerIndexEntry};
    use mops_store::{InMemoryExternalStore, InMemoryRegistry};
    use std::collections::BTreeMap;

    const REPO: &str = "modelops/bundles/demo";

    fn resolved(layer_indexes: BTreeMap<String, String>) -> ResolvedBundle {
        ResolvedBundle {
            bundle_ref: crate::BundleRef::named("demo", "1.0").unwrap(),
            repository: REPO.into(),
            manifest_digest: format!("sha256:{}", "0".repeat(64)),
            media_type: crate::model::BUNDLE_MANIFEST_MEDIA_TYPE.into(),
            roles: BTreeMap::new(),
            layers: layer_indexes.keys().cloned().collect(),
            layer_indexes,
            external_index_present: true,
            total_size: 0,
            cache_dir: None,
        }
    }

    async fn publish_index(registry: &InMemoryRegistry, index: &LayerIndex) -> String {
        let bytes = index.canonical_bytes().unwrap();
        let digest = index.digest().unwrap();
        registry.put_blob(REPO, &digest, Bytes::from(bytes)).await.unwrap();
        digest
    }

    #[tokio::test]
    async fn test_enumerates_and_fetches_both_kinds() {
        let registry = Arc::new(InMemoryRegistry::new());
        let external = Arc::new(InMemoryExternalStore::new());

        let code = Bytes::from_static(b"print('hi')\n");
        let code_digest = sha256_digest(&code);
        registry.put_blob(REPO, &code_digest, code.clone()).await.unwrap();

        let data = Bytes::from_static(b"a,b\n1,2\n");
        let stat = external.put("az://c/train.csv", data.clone(), None, None).await.unwrap();

        let idx_code = LayerIndex::new(
            "code",
            vec![LayerIndexEntry::oras("src/main.py", "code", &code_digest, code.len() as u64)],
        );
        let idx_data = LayerIndex::new(
            "data",
            vec![LayerIndexEntry::external(
                "data/train.csv",
                "data",
                ExternalDescriptor {
                    uri: stat.uri.clone(),
                    sha256: stat.sha256.clone().unwrap(),
                    size: stat.size,
                    tier: None,
                },
            )],
        );
        let mut indexes = BTreeMap::new();
        indexes.insert("code".to_string(), publish_index(&registry, &idx_code).await);
        indexes.insert("data".to_string(), publish_index(&registry, &idx_data).await);
        let resolved = resolved(indexes);

        let provider = RegistryContentProvider::new(registry, external);
        let layers = vec!["data".to_string(), "code".to_string()];
        let entries: Vec<MatEntry> = provider
            .iter_entries(&resolved, &layers)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path(), "data/train.csv");
        assert_eq!(entries[1].path(), "src/main.py");

        assert_eq!(provider.fetch(&resolved, &entries[0]).await.unwrap(), data);
        assert_eq!(provider.fetch(&resolved, &entries[1]).await.unwrap(), code);

        // Enumeration is repeatable.
        let again: Vec<MatEntry> = provider
            .iter_entries(&resolved, &layers)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(again, entries);
    }

    #[tokio::test]
    async fn test_missing_index_is_not_found() {
        let registry = Arc::new(InMemoryRegistry::new());
        let mut indexes = BTreeMap::new();
        indexes.insert("code".to_string(), format!("sha256:{}", "1".repeat(64)));
        let resolved = resolved(indexes);

        let provider = RegistryContentProvider::new(registry, Arc::new(InMemoryExternalStore::new()));
        let layers = vec!["code".to_string()];
        let err = provider
            .iter_entries(&resolved, &layers)
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_unknown_layer_is_validation_error() {
        let provider = RegistryContentProvider::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InMemoryExternalStore::new()),
        );
        let resolved = resolved(BTreeMap::new());
        let layers = vec!["ghost".to_string()];
        let err = provider
            .iter_entries(&resolved, &layers)
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }
}
