//! External object storage seam.
//!
//! External entries are addressed by [`ExternalUri`] strings. Content is
//! verified by the caller against the bundle's recorded SHA-256; `put` can
//! additionally verify a supplied hash before storing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::uri::ExternalUri;

/// Metadata for an object in external storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalStat {
    pub uri: String,
    pub size: u64,
    /// Bare lowercase hex, when the backend knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

/// Access to external object storage (Azure Blob, S3, GCS, ...).
#[async_trait]
pub trait ExternalStore: Send + Sync {
    /// Download the object at `uri`.
    async fn get(&self, uri: &str) -> StoreResult<Bytes>;

    /// Object metadata without downloading content.
    async fn stat(&self, uri: &str) -> StoreResult<ExternalStat>;

    /// Upload `data` to `uri`.
    ///
    /// When `sha256` is given the bytes are hashed first and a mismatch is
    /// reported as [`StoreError::DigestMismatch`] without storing anything.
    async fn put(
        &self,
        uri: &str,
        data: Bytes,
        sha256: Option<&str>,
        tier: Option<&str>,
    ) -> StoreResult<ExternalStat>;
}

/// Hash `data` and compare against an optional expected bare hex digest.
pub(crate) fn verify_sha256(uri: &str, data: &[u8], expected: Option<&str>) -> StoreResult<String> {
    let actual = hex::encode(Sha256::digest(data));
    if let Some(expected) = expected {
        if expected != actual {
            return Err(StoreError::DigestMismatch {
                key: uri.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
    }
    Ok(actual)
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    sha256: String,
    tier: Option<String>,
}

/// External store held entirely in memory, keyed by normalized URI.
#[derive(Debug, Default)]
pub struct InMemoryExternalStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl InMemoryExternalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored URIs in sorted order.
    pub async fn uris(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// Replace stored bytes without verification, for corrupting fixtures.
    pub async fn overwrite_unchecked(&self, uri: &str, data: Bytes) -> StoreResult<()> {
        let key = ExternalUri::parse(uri)?.to_string();
        let sha256 = hex::encode(Sha256::digest(&data));
        let mut objects = self.objects.write().await;
        let tier = objects.get(&key).and_then(|o| o.tier.clone());
        objects.insert(key, StoredObject { data, sha256, tier });
        Ok(())
    }
}

#[async_trait]
impl ExternalStore for InMemoryExternalStore {
    async fn get(&self, uri: &str) -> StoreResult<Bytes> {
        let key = ExternalUri::parse(uri)?.to_string();
        self.objects
            .read()
            .await
            .get(&key)
            .map(|o| o.data.clone())
            .ok_or(StoreError::NotFound { key })
    }

    async fn stat(&self, uri: &str) -> StoreResult<ExternalStat> {
        let key = ExternalUri::parse(uri)?.to_string();
        let objects = self.objects.read().await;
        let object = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        Ok(ExternalStat {
            uri: key,
            size: object.data.len() as u64,
            sha256: Some(object.sha256.clone()),
            tier: object.tier.clone(),
        })
    }

    async fn put(
        &self,
        uri: &str,
        data: Bytes,
        sha256: Option<&str>,
        tier: Option<&str>,
    ) -> StoreResult<ExternalStat> {
        let key = ExternalUri::parse(uri)?.to_string();
        let actual = verify_sha256(&key, &data, sha256)?;
        let size = data.len() as u64;

        debug!(uri = %key, size, "stored external object");
        self.objects.write().await.insert(
            key.clone(),
            StoredObject {
                data,
                sha256: actual.clone(),
                tier: tier.map(str::to_string),
            },
        );

        Ok(ExternalStat {
            uri: key,
            size,
            sha256: Some(actual),
            tier: tier.map(str::to_string),
        })
    }
}
