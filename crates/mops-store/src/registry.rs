//! OCI-style registry seam.
//!
//! The network client lives outside this workspace. Everything here talks to
//! the registry through [`BundleRegistry`], and tests use [`InMemoryRegistry`].

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Content-addressed blob and manifest access for one registry.
///
/// Repositories are full paths such as `registry.example.com/team/bundles/demo`.
/// Manifest references are either a tag or a `sha256:` digest.
#[async_trait]
pub trait BundleRegistry: Send + Sync {
    /// Fetch raw manifest bytes by tag or digest.
    async fn get_manifest(&self, repository: &str, reference: &str) -> StoreResult<Bytes>;

    /// Fetch a blob by digest.
    async fn get_blob(&self, repository: &str, digest: &str) -> StoreResult<Bytes>;

    /// Check whether a blob is already present.
    async fn blob_exists(&self, repository: &str, digest: &str) -> StoreResult<bool>;

    /// Upload a blob. Implementations must reject bytes that do not hash to `digest`.
    async fn put_blob(&self, repository: &str, digest: &str, data: Bytes) -> StoreResult<()>;

    /// Upload a manifest, optionally tagging it.
    ///
    /// Returns the manifest digest (`sha256:` of `payload`).
    async fn put_manifest(
        &self,
        repository: &str,
        tag: Option<&str>,
        media_type: &str,
        payload: Bytes,
    ) -> StoreResult<String>;
}

fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

#[derive(Debug, Default)]
struct Repository {
    /// Keyed by digest.
    manifests: HashMap<String, StoredManifest>,
    /// Tag -> digest.
    tags: HashMap<String, String>,
    blobs: HashMap<String, Bytes>,
}

#[derive(Debug, Clone)]
struct StoredManifest {
    media_type: String,
    payload: Bytes,
}

/// Registry held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    repositories: RwLock<HashMap<String, Repository>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Media type recorded for a manifest, if present.
    pub async fn manifest_media_type(&self, repository: &str, reference: &str) -> Option<String> {
        let repos = self.repositories.read().await;
        let repo = repos.get(repository)?;
        let digest = resolve_reference(repo, reference)?;
        repo.manifests.get(digest).map(|m| m.media_type.clone())
    }

    /// Number of blobs stored in a repository.
    pub async fn blob_count(&self, repository: &str) -> usize {
        self.repositories
            .read()
            .await
            .get(repository)
            .map_or(0, |r| r.blobs.len())
    }

    /// Drop a blob, for simulating partially garbage-collected repositories.
    pub async fn remove_blob(&self, repository: &str, digest: &str) -> bool {
        let mut repos = self.repositories.write().await;
        repos
            .get_mut(repository)
            .and_then(|r| r.blobs.remove(digest))
            .is_some()
    }
}

fn resolve_reference<'a>(repo: &'a Repository, reference: &'a str) -> Option<&'a str> {
    if reference.starts_with("sha256:") {
        repo.manifests.contains_key(reference).then_some(reference)
    } else {
        repo.tags.get(reference).map(String::as_str)
    }
}

#[async_trait]
impl BundleRegistry for InMemoryRegistry {
    async fn get_manifest(&self, repository: &str, reference: &str) -> StoreResult<Bytes> {
        let repos = self.repositories.read().await;
        let not_found = || StoreError::NotFound {
            key: format!("{}:{}", repository, reference),
        };
        let repo = repos.get(repository).ok_or_else(not_found)?;
        let digest = resolve_reference(repo, reference).ok_or_else(not_found)?;
        repo.manifests
            .get(digest)
            .map(|m| m.payload.clone())
            .ok_or_else(not_found)
    }

    async fn get_blob(&self, repository: &str, digest: &str) -> StoreResult<Bytes> {
        let repos = self.repositories.read().await;
        repos
            .get(repository)
            .and_then(|r| r.blobs.get(digest))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: format!("{}@{}", repository, digest),
            })
    }

    async fn blob_exists(&self, repository: &str, digest: &str) -> StoreResult<bool> {
        let repos = self.repositories.read().await;
        Ok(repos
            .get(repository)
            .is_some_and(|r| r.blobs.contains_key(digest)))
    }

    async fn put_blob(&self, repository: &str, digest: &str, data: Bytes) -> StoreResult<()> {
        let actual = sha256_digest(&data);
        if actual != digest {
            return Err(StoreError::DigestMismatch {
                key: format!("{}@{}", repository, digest),
                expected: digest.to_string(),
                actual,
            });
        }

        debug!(repository, digest, size = data.len(), "stored blob");
        let mut repos = self.repositories.write().await;
        repos
            .entry(repository.to_string())
            .or_default()
            .blobs
            .insert(digest.to_string(), data);
        Ok(())
    }

    async fn put_manifest(
        &self,
        repository: &str,
        tag: Option<&str>,
        media_type: &str,
        payload: Bytes,
    ) -> StoreResult<String> {
        let digest = sha256_digest(&payload);

        let mut repos = self.repositories.write().await;
        let repo = repos.entry(repository.to_string()).or_default();
        repo.manifests.insert(
            digest.clone(),
            StoredManifest {
                media_type: media_type.to_string(),
                payload,
            },
        );
        if let Some(tag) = tag {
            repo.tags.insert(tag.to_string(), digest.clone());
        }

        debug!(repository, ?tag, digest = %digest, "stored manifest");
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = "registry.local/team/bundles/demo";

    #[tokio::test]
    async fn test_blob_roundtrip() {
        let registry = InMemoryRegistry::new();
        let data = Bytes::from_static(b"hello");
        let digest = sha256_digest(&data);

        assert!(!registry.blob_exists(REPO, &digest).await.unwrap());
        registry.put_blob(REPO, &digest, data.clone()).await.unwrap();
        assert!(registry.blob_exists(REPO, &digest).await.unwrap());
        assert_eq!(registry.get_blob(REPO, &digest).await.unwrap(), data);
        assert_eq!(registry.blob_count(REPO).await, 1);
    }

    #[tokio::test]
    async fn test_put_blob_rejects_wrong_digest() {
        let registry = InMemoryRegistry::new();
        let wrong = sha256_digest(b"other");
        let err = registry
            .put_blob(REPO, &wrong, Bytes::from_static(b"hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn test_manifest_by_tag_and_digest() {
        let registry = InMemoryRegistry::new();
        let payload = Bytes::from_static(br#"{"schemaVersion":2}"#);
        let digest = registry
            .put_manifest(REPO, Some("1.0.0"), "application/json", payload.clone())
            .await
            .unwrap();

        assert_eq!(digest, sha256_digest(&payload));
        assert_eq!(registry.get_manifest(REPO, "1.0.0").await.unwrap(), payload);
        assert_eq!(registry.get_manifest(REPO, &digest).await.unwrap(), payload);
        assert_eq!(
            registry.manifest_media_type(REPO, "1.0.0").await.as_deref(),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_missing_manifest_is_not_found() {
        let registry = InMemoryRegistry::new();
        let err = registry.get_manifest(REPO, "missing").await.unwrap_err();
        assert!(err.is_not_found());

        let err = registry
            .get_blob(REPO, &sha256_digest(b"x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_remove_blob() {
        let registry = InMemoryRegistry::new();
        let data = Bytes::from_static(b"gone soon");
        let digest = sha256_digest(&data);
        registry.put_blob(REPO, &digest, data).await.unwrap();

        assert!(registry.remove_blob(REPO, &digest).await);
        assert!(!registry.remove_blob(REPO, &digest).await);
        assert!(registry.get_blob(REPO, &digest).await.is_err());
    }
}
