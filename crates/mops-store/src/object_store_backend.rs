//! `object_store`-backed implementation of [`ExternalStore`].
//!
//! One backend client is built per `(scheme, container)` the first time a URI
//! addresses it, then reused:
//! - `s3://` → `AmazonS3Builder::from_env()`
//! - `az://` → `MicrosoftAzureBuilder::from_env()`
//! - `gs://` → `GoogleCloudStorageBuilder::from_env()`
//! - `file://` → `LocalFileSystem` rooted at `<file_root>/<container>`
//! - `memory://` → `InMemory` (one per container)

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::external::{verify_sha256, ExternalStat, ExternalStore};
use crate::uri::{ExternalUri, UriScheme};

type StoreKey = (UriScheme, String);

/// External store dispatching to `object_store` backends by URI scheme.
pub struct ObjectStoreExternal {
    file_root: Option<PathBuf>,
    stores: RwLock<HashMap<StoreKey, Arc<dyn ObjectStore>>>,
}

impl Default for ObjectStoreExternal {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStoreExternal {
    /// Cloud schemes read credentials from the environment; `file://` is disabled.
    pub fn new() -> Self {
        Self {
            file_root: None,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Enable `file://container/key`, stored under `root/container/key`.
    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = Some(root.into());
        self
    }

    /// Use a preconfigured backend for one container.
    pub async fn register(&self, scheme: UriScheme, container: &str, store: Arc<dyn ObjectStore>) {
        self.stores
            .write()
            .await
            .insert((scheme, container.to_string()), store);
    }

    async fn store_for(&self, uri: &ExternalUri) -> StoreResult<Arc<dyn ObjectStore>> {
        let key = (uri.scheme(), uri.container().to_string());
        if let Some(store) = self.stores.read().await.get(&key) {
            return Ok(Arc::clone(store));
        }

        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(&key) {
            return Ok(Arc::clone(store));
        }
        let store = self.build(uri)?;
        debug!(scheme = %uri.scheme(), container = uri.container(), "created external store client");
        stores.insert(key, Arc::clone(&store));
        Ok(store)
    }

    fn build(&self, uri: &ExternalUri) -> StoreResult<Arc<dyn ObjectStore>> {
        let container = uri.container();
        let client_err = |e: object_store::Error| StoreError::Io {
            message: format!("failed to create {} client for '{}': {}", uri.scheme(), container, e),
        };

        let store: Arc<dyn ObjectStore> = match uri.scheme() {
            UriScheme::Memory => Arc::new(object_store::memory::InMemory::new()),
            UriScheme::File => {
                let root = self.file_root.as_ref().ok_or_else(|| StoreError::Unsupported {
                    operation: "file:// URIs without a configured file root".to_string(),
                })?;
                let path = root.join(container);
                std::fs::create_dir_all(&path).map_err(|e| StoreError::Io {
                    message: format!("failed to create store directory {}: {}", path.display(), e),
                })?;
                Arc::new(
                    object_store::local::LocalFileSystem::new_with_prefix(&path)
                        .map_err(client_err)?,
                )
            }
            UriScheme::S3 => Arc::new(
                object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(container)
                    .with_allow_http(false)
                    .build()
                    .map_err(client_err)?,
            ),
            UriScheme::Azure => Arc::new(
                object_store::azure::MicrosoftAzureBuilder::from_env()
                    .with_container_name(container)
                    .build()
                    .map_err(client_err)?,
            ),
            UriScheme::Gcs => Arc::new(
                object_store::gcp::GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(container)
                    .build()
                    .map_err(client_err)?,
            ),
        };
        Ok(store)
    }
}

#[async_trait]
impl ExternalStore for ObjectStoreExternal {
    async fn get(&self, uri: &str) -> StoreResult<Bytes> {
        let parsed = ExternalUri::parse(uri)?;
        let store = self.store_for(&parsed).await?;
        let location = object_store::path::Path::from(parsed.key());

        let result = store
            .get(&location)
            .await
            .map_err(|e| StoreError::from_object_store(e, uri))?;

        result.bytes().await.map_err(|e| StoreError::Io {
            message: format!("failed to read {}: {}", uri, e),
        })
    }

    async fn stat(&self, uri: &str) -> StoreResult<ExternalStat> {
        let parsed = ExternalUri::parse(uri)?;
        let store = self.store_for(&parsed).await?;
        let location = object_store::path::Path::from(parsed.key());

        let meta = store
            .head(&location)
            .await
            .map_err(|e| StoreError::from_object_store(e, uri))?;

        Ok(ExternalStat {
            uri: parsed.to_string(),
            size: meta.size,
            sha256: None,
            tier: None,
        })
    }

    async fn put(
        &self,
        uri: &str,
        data: Bytes,
        sha256: Option<&str>,
        tier: Option<&str>,
    ) -> StoreResult<ExternalStat> {
        let parsed = ExternalUri::parse(uri)?;
        let actual = verify_sha256(uri, &data, sha256)?;
        let store = self.store_for(&parsed).await?;
        let location = object_store::path::Path::from(parsed.key());
        let size = data.len() as u64;

        store
            .put(&location, PutPayload::from_bytes(data))
            .await
            .map_err(|e| StoreError::Io {
                message: format!("failed to put {}: {}", uri, e),
            })?;

        debug!(uri, size, "uploaded external object");
        Ok(ExternalStat {
            uri: parsed.to_string(),
            size,
            sha256: Some(actual),
            tier: tier.map(str::to_string),
        })
    }
}
