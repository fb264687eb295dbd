//! Error types for bundle operations.

use std::fmt;
use std::path::PathBuf;

use mops_store::StoreError;
use serde::{Deserialize, Serialize};

/// Bundle errors.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// Bundle, manifest or blob absent.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Malformed reference, manifest, digest or path.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Storage planning could not place a file.
    #[error("planning failed: {message}")]
    Planning { message: String },

    /// No resolvable role, or the role references missing layers.
    #[error("role mismatch: {message}")]
    RoleMismatch {
        message: String,
        available: Vec<String>,
    },

    /// Existing content disagrees with the bundle and overwrite was not granted.
    #[error("{} path(s) conflict with existing content", .conflicts.len())]
    WorkdirConflict { conflicts: Vec<Conflict> },

    /// Registry or external store failure.
    #[error("download failed: {message}")]
    Download { message: String },

    /// Local filesystem failure.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse error classification, independent of payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    RoleMismatch,
    WorkdirConflict,
    Download,
}

impl BundleError {
    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn planning(message: impl Into<String>) -> Self {
        Self::Planning {
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } | Self::Planning { .. } => ErrorKind::Validation,
            Self::RoleMismatch { .. } => ErrorKind::RoleMismatch,
            Self::WorkdirConflict { .. } => ErrorKind::WorkdirConflict,
            Self::Download { .. } | Self::Io { .. } => ErrorKind::Download,
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => 1,

            Self::Validation { .. } => 2,
            Self::Planning { .. } => 2,

            Self::Download { .. } => 3,
            Self::Io { .. } => 3,

            Self::RoleMismatch { .. } => 11,
            Self::WorkdirConflict { .. } => 12,
        }
    }

    /// Conflicts carried by a `WorkdirConflict`, empty otherwise.
    pub fn conflicts(&self) -> &[Conflict] {
        match self {
            Self::WorkdirConflict { conflicts } => conflicts,
            _ => &[],
        }
    }
}

impl From<StoreError> for BundleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key } => Self::NotFound {
                message: format!("{} not found", key),
            },
            StoreError::InvalidUri { .. } => Self::Validation {
                message: err.to_string(),
            },
            other => Self::Download {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;

/// One path whose on-disk state disagrees with the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub path: String,
    #[serde(flatten)]
    pub reason: ConflictReason,
}

impl Conflict {
    pub fn new(path: impl Into<String>, reason: ConflictReason) -> Self {
        Self {
            path: path.into(),
            reason,
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Why a path conflicts. Hashes are bare lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConflictReason {
    /// Existing file differs from the expected content.
    ContentMismatch { expected: String, actual: String },
    /// Fetched external bytes differ from the declared hash.
    IntegrityMismatch { expected: String, actual: String },
    /// A directory sits where a file is expected.
    DirectoryInPlace,
    /// Existing path could not be read.
    Unreadable { expected: String },
    /// Two entries claim the same path.
    DuplicatePath {
        first_layer: String,
        duplicate_layer: String,
    },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentMismatch { expected, actual } => {
                write!(f, "content differs (expected {}, found {})", expected, actual)
            }
            Self::IntegrityMismatch { expected, actual } => {
                write!(f, "fetched bytes failed verification (expected {}, got {})", expected, actual)
            }
            Self::DirectoryInPlace => f.write_str("expected file but found directory"),
            Self::Unreadable { expected } => {
                write!(f, "existing file unreadable (expected {})", expected)
            }
            Self::DuplicatePath {
                first_layer,
                duplicate_layer,
            } => write!(
                f,
                "claimed by layer '{}' and again by layer '{}'",
                first_layer, duplicate_layer
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(BundleError::not_found("x").exit_code(), 1);
        assert_eq!(BundleError::validation("x").exit_code(), 2);
        assert_eq!(BundleError::planning("x").exit_code(), 2);
        assert_eq!(
            BundleError::Download {
                message: "x".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(
            BundleError::io("/tmp/x", std::io::Error::other("boom")).exit_code(),
            3
        );
        assert_eq!(
            BundleError::RoleMismatch {
                message: "x".into(),
                available: vec![],
            }
            .exit_code(),
            11
        );
        assert_eq!(
            BundleError::WorkdirConflict { conflicts: vec![] }.exit_code(),
            12
        );
    }

    #[test]
    fn test_planning_is_validation_kind() {
        assert_eq!(BundleError::planning("too big").kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_store_error_mapping() {
        let err: BundleError = StoreError::NotFound { key: "k".into() }.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: BundleError = StoreError::InvalidUri {
            uri: "x".into(),
            reason: "bad".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: BundleError = StoreError::Io {
            message: "reset".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Download);
    }

    #[test]
    fn test_conflict_serializes_flat() {
        let conflict = Conflict::new(
            "src/model.py",
            ConflictReason::ContentMismatch {
                expected: "a".repeat(64),
                actual: "b".repeat(64),
            },
        );
        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["path"], "src/model.py");
        assert_eq!(json["reason"], "content_mismatch");
        assert_eq!(json["expected"], "a".repeat(64));
    }

    #[test]
    fn test_conflict_list_in_message() {
        let err = BundleError::WorkdirConflict {
            conflicts: vec![
                Conflict::new("a", ConflictReason::DirectoryInPlace),
                Conflict::new(
                    "b",
                    ConflictReason::Unreadable {
                        expected: "c".repeat(64),
                    },
                ),
            ],
        };
        assert_eq!(err.to_string(), "2 path(s) conflict with existing content");
        assert_eq!(err.conflicts().len(), 2);
    }
}
