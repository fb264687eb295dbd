//! External storage URI parsing.
//!
//! Accepted form: `{scheme}://{container_or_bucket}/{key}`
//!
//! - `az://container/data/train.csv` → Azure Blob
//! - `s3://bucket/models/model.pkl` → S3 and S3-compatible
//! - `gs://bucket/raw/part-0.parquet` → Google Cloud Storage
//! - `file://root/data.bin` → local filesystem store (dev)
//! - `memory://c/data.bin` → in-memory store (tests)

use std::fmt;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

/// Registered external storage providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UriScheme {
    Azure,
    S3,
    Gcs,
    File,
    Memory,
}

impl UriScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "az",
            Self::S3 => "s3",
            Self::Gcs => "gs",
            Self::File => "file",
            Self::Memory => "memory",
        }
    }

    fn parse(scheme: &str) -> Option<Self> {
        match scheme {
            "az" => Some(Self::Azure),
            "s3" => Some(Self::S3),
            "gs" => Some(Self::Gcs),
            "file" => Some(Self::File),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

impl fmt::Display for UriScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated external storage URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalUri {
    scheme: UriScheme,
    container: String,
    key: String,
}

impl ExternalUri {
    /// Parse and validate an external URI.
    ///
    /// # Examples
    ///
    /// ```
    /// use mops_store::ExternalUri;
    ///
    /// let uri = ExternalUri::parse("az://mycontainer/data/file.csv").unwrap();
    /// assert_eq!(uri.container(), "mycontainer");
    /// assert_eq!(uri.key(), "data/file.csv");
    ///
    /// assert!(ExternalUri::parse("az://c/../etc/passwd").is_err());
    /// assert!(ExternalUri::parse("az:///leading/slash").is_err());
    /// ```
    pub fn parse(uri: &str) -> StoreResult<Self> {
        let invalid = |reason: &str| StoreError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        if uri.is_empty() {
            return Err(invalid("uri cannot be empty"));
        }
        if uri.contains("..") {
            return Err(invalid("uri contains path traversal"));
        }
        if uri.contains('\\') {
            return Err(invalid("uri contains backslashes (use forward slashes)"));
        }

        let (scheme, remainder) = uri
            .split_once("://")
            .ok_or_else(|| invalid("expected scheme://container/key"))?;
        let scheme = UriScheme::parse(scheme)
            .ok_or_else(|| invalid(&format!("unsupported scheme '{}'", scheme)))?;

        if remainder.starts_with('/') {
            return Err(invalid("path cannot start with '/'"));
        }

        let (container, key) = remainder
            .split_once('/')
            .ok_or_else(|| invalid("missing key part, expected container/key"))?;

        if container.is_empty() {
            return Err(invalid("container/bucket name cannot be empty"));
        }
        if key.is_empty() {
            return Err(invalid("key cannot be empty"));
        }

        Ok(Self {
            scheme,
            container: container.to_string(),
            key: key.to_string(),
        })
    }

    pub fn scheme(&self) -> UriScheme {
        self.scheme
    }

    /// Container (Azure) or bucket (S3/GCS) name.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Object key within the container.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ExternalUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.container, self.key)
    }
}

impl FromStr for ExternalUri {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_azure() {
        let uri = ExternalUri::parse("az://mycontainer/data/file.csv").unwrap();
        assert_eq!(uri.scheme(), UriScheme::Azure);
        assert_eq!(uri.container(), "mycontainer");
        assert_eq!(uri.key(), "data/file.csv");
        assert_eq!(uri.to_string(), "az://mycontainer/data/file.csv");
    }

    #[test]
    fn test_parse_s3_and_gcs() {
        let s3 = ExternalUri::parse("s3://bucket/models/model.pkl").unwrap();
        assert_eq!(s3.scheme(), UriScheme::S3);
        let gs: ExternalUri = "gs://bucket/a".parse().unwrap();
        assert_eq!(gs.scheme(), UriScheme::Gcs);
        assert_eq!(gs.key(), "a");
    }

    #[test]
    fn test_rejects_unsafe_forms() {
        for bad in [
            "",
            "az://c/../x",
            "az://c\\x",
            "az:///x/y",
            "az://container",
            "az://container/",
            "az:///",
            "ftp://c/k",
            "no-scheme/c/k",
        ] {
            assert!(ExternalUri::parse(bad).is_err(), "expected rejection: {bad:?}");
        }
    }

    #[test]
    fn test_error_carries_uri() {
        let err = ExternalUri::parse("http://c/k").unwrap_err();
        match err {
            StoreError::InvalidUri { uri, reason } => {
                assert_eq!(uri, "http://c/k");
                assert!(reason.contains("unsupported scheme"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
