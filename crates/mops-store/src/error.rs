//! Error types for registry and external storage operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by registry and external store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Manifest, blob or object not found.
    #[error("not found: {key}")]
    NotFound { key: String },

    /// External URI failed validation.
    #[error("invalid external uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// Supplied content hash disagrees with the bytes.
    #[error("digest mismatch for {key}: expected {expected}, got {actual}")]
    DigestMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Network or I/O error.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// The backend cannot serve this scheme or operation.
    #[error("operation not supported: {operation}")]
    Unsupported { operation: String },

    /// Generic error from the underlying object store.
    #[error("object store error: {0}")]
    ObjectStore(object_store::Error),
}

impl StoreError {
    /// Returns true if the requested item does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Create from an object_store error with context about the key.
    pub fn from_object_store(err: object_store::Error, key: &str) -> Self {
        match &err {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                key: key.to_string(),
            },
            _ => StoreError::ObjectStore(err),
        }
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        StoreError::from_object_store(err, "unknown")
    }
}
