//! Filesystem helpers for the runtime.
//!
//! Every file the runtime writes goes through [`write_atomic`]: a uniquely
//! named temp file in the target directory, `sync_all`, then rename.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{BundleError, BundleResult};

pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> BundleResult<()> {
    let (parent, file_name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => (parent, name.to_string_lossy()),
        _ => {
            return Err(BundleError::validation(format!(
                "cannot write to {}: no parent directory",
                path.display()
            )))
        }
    };

    fs::create_dir_all(parent)
        .await
        .map_err(|e| BundleError::io(parent, e))?;

    let temp_path = parent.join(format!(".{}.tmp.{}", file_name, Uuid::new_v4().simple()));

    let written = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(BundleError::io(path, e));
    }
    Ok(())
}

/// Streamed bare hex SHA-256 of a file.
pub(crate) async fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_creates_parents_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a/b/c.txt");

        write_atomic(&target, b"hello").await.unwrap();
        write_atomic(&target, b"hello again").await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"hello again");
        let names: Vec<_> = std::fs::read_dir(dir.path().join("a/b"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("c.txt")]);
    }

    #[tokio::test]
    async fn test_file_sha256_matches_in_memory() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("blob");
        let data = vec![7_u8; 200_000];
        std::fs::write(&target, &data).unwrap();

        assert_eq!(
            file_sha256(&target).await.unwrap(),
            crate::digest::sha256_hex(&data)
        );
    }
}
