//! Pointer files: durable records of external content.
//!
//! A pointer never sits next to its data file. The placement rule is
//! `<dest>/.mops/ptr/<original_dir>/<original_filename>.json`, written as
//! canonical JSON through an atomic rename.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canonical;
use crate::digest::is_sha256_hex;
use crate::error::{BundleError, BundleResult};
use crate::fsio::write_atomic;
use crate::path_safety::{self, RESERVED_PREFIX};

pub const POINTER_SCHEMA_VERSION: u32 = 1;

/// Directory under the reserved prefix holding pointer files.
pub const POINTER_DIR: &str = "ptr";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerFile {
    pub schema_version: u32,
    pub uri: String,
    /// Bare lowercase hex.
    pub sha256: String,
    pub size: u64,
    #[serde(default)]
    pub tier: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub fulfilled: bool,
    /// Relative path of the local copy, only when fulfilled.
    #[serde(default)]
    pub local_path: Option<String>,
    pub original_path: String,
    pub layer: String,
}

impl PointerFile {
    /// Unfulfilled pointer stamped with the current time.
    pub fn new(
        original_path: impl Into<String>,
        layer: impl Into<String>,
        uri: impl Into<String>,
        sha256: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            schema_version: POINTER_SCHEMA_VERSION,
            uri: uri.into(),
            sha256: sha256.into(),
            size,
            tier: None,
            created_at: Utc::now(),
            fulfilled: false,
            local_path: None,
            original_path: original_path.into(),
            layer: layer.into(),
        }
    }

    pub fn with_tier(mut self, tier: Option<String>) -> Self {
        self.tier = tier;
        self
    }

    /// Mark the data as present locally at `local_path`.
    pub fn with_local_copy(mut self, local_path: impl Into<String>) -> Self {
        self.fulfilled = true;
        self.local_path = Some(local_path.into());
        self
    }

    pub fn validate(&self) -> BundleResult<()> {
        if self.schema_version != POINTER_SCHEMA_VERSION {
            return Err(BundleError::validation(format!(
                "unsupported pointer schema_version {}",
                self.schema_version
            )));
        }
        if !is_sha256_hex(&self.sha256) {
            return Err(BundleError::validation(format!(
                "pointer sha256 must match ^[a-f0-9]{{64}}$, got '{}'",
                self.sha256
            )));
        }
        if self.fulfilled != self.local_path.is_some() {
            return Err(BundleError::validation(
                "pointer local_path must be set exactly when fulfilled",
            ));
        }
        Ok(())
    }
}

/// Pointer location for a bundle-relative data path.
pub fn pointer_path_for(dest_root: &Path, original_relpath: &str) -> BundleResult<PathBuf> {
    let rel = path_safety::validate(original_relpath)?;
    let (dir, name) = match rel.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, rel.as_str()),
    };

    let mut path = dest_root.join(RESERVED_PREFIX).join(POINTER_DIR);
    if let Some(dir) = dir {
        path = path.join(dir);
    }
    Ok(path.join(format!("{}.json", name)))
}

/// Write `pointer` at its canonical location and return that path.
pub async fn write_pointer(dest_root: &Path, pointer: &PointerFile) -> BundleResult<PathBuf> {
    pointer.validate()?;
    let path = pointer_path_for(dest_root, &pointer.original_path)?;
    let bytes = canonical::to_vec(pointer)?;
    write_atomic(&path, &bytes).await?;

    debug!(
        path = %path.display(),
        uri = %pointer.uri,
        fulfilled = pointer.fulfilled,
        "wrote pointer"
    );
    Ok(path)
}

/// Read and validate a pointer file.
///
/// A missing file is `NotFound`; unparseable or invalid content is `Validation`.
pub async fn read_pointer(path: &Path) -> BundleResult<PointerFile> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BundleError::not_found(format!(
                "pointer file {}",
                path.display()
            )))
        }
        Err(e) => return Err(BundleError::io(path, e)),
    };
    let pointer: PointerFile = serde_json::from_slice(&bytes).map_err(|e| {
        BundleError::validation(format!("malformed pointer file {}: {}", path.display(), e))
    })?;
    pointer.validate()?;
    Ok(pointer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn sample() -> PointerFile {
        PointerFile::new("data/train.csv", "data", "az://c/train.csv", "ab".repeat(32), 1_048_576)
    }

    #[test]
    fn test_placement_rule() {
        let root = Path::new("/w");
        assert_eq!(
            pointer_path_for(root, "data/fit/2022.parquet").unwrap(),
            Path::new("/w/.mops/ptr/data/fit/2022.parquet.json")
        );
        assert_eq!(
            pointer_path_for(root, "top.bin").unwrap(),
            Path::new("/w/.mops/ptr/top.bin.json")
        );
        assert!(pointer_path_for(root, "../x").is_err());
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let pointer = sample();

        let path = write_pointer(dir.path(), &pointer).await.unwrap();
        assert_eq!(path, dir.path().join(".mops/ptr/data/train.csv.json"));
        assert!(!dir.path().join("data/train.csv").exists());

        let back = read_pointer(&path).await.unwrap();
        assert_eq!(back, pointer);
        assert!(!back.fulfilled);
        assert_eq!(back.local_path, None);
    }

    #[tokio::test]
    async fn test_written_form_is_canonical() {
        let dir = TempDir::new().unwrap();
        let path = write_pointer(dir.path(), &sample()).await.unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with(r#"{"created_at":"#));
        assert!(!text.contains(": "));
        assert!(text.contains(r#""tier":null"#));
    }

    #[tokio::test]
    async fn test_rewrite_upgrades_to_fulfilled() {
        let dir = TempDir::new().unwrap();
        write_pointer(dir.path(), &sample()).await.unwrap();
        let fulfilled = sample().with_local_copy("data/train.csv");
        let path = write_pointer(dir.path(), &fulfilled).await.unwrap();

        let back = read_pointer(&path).await.unwrap();
        assert!(back.fulfilled);
        assert_eq!(back.local_path.as_deref(), Some("data/train.csv"));
    }

    #[tokio::test]
    async fn test_read_distinguishes_missing_from_malformed() {
        let dir = TempDir::new().unwrap();
        let missing = read_pointer(&dir.path().join("nope.json")).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, b"{not json").unwrap();
        assert_eq!(read_pointer(&bad).await.unwrap_err().kind(), ErrorKind::Validation);

        let mut invalid = sample();
        invalid.sha256 = "XYZ".into();
        let invalid_path = dir.path().join("invalid.json");
        std::fs::write(&invalid_path, serde_json::to_vec(&invalid).unwrap()).unwrap();
        assert_eq!(
            read_pointer(&invalid_path).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[tokio::test]
    async fn test_rejects_inconsistent_fulfilment() {
        let dir = TempDir::new().unwrap();
        let mut pointer = sample();
        pointer.fulfilled = true;
        assert!(write_pointer(dir.path(), &pointer).await.is_err());
    }
}
