//! Validation for relative paths supplied by users or layer indexes.
//!
//! Every path that comes out of a layer index or provider goes through
//! [`validate`] before it is joined onto a destination directory.

use crate::error::{BundleError, BundleResult};

/// Reserved top-level directory for pointer files and provenance.
pub const RESERVED_PREFIX: &str = ".mops";

/// Validate and normalize a relative POSIX path.
///
/// Rejects empty paths, `"."`, backslashes, NUL bytes, absolute paths, any
/// `..` segment, and `.mops` itself or anything under it. Redundant
/// separators and `.` segments are removed.
///
/// # Examples
///
/// ```
/// use mops_bundles::path_safety::validate;
///
/// assert_eq!(validate("src//./model.py").unwrap(), "src/model.py");
/// assert!(validate("../secrets.txt").is_err());
/// assert!(validate(".mops/hijack.json").is_err());
/// ```
pub fn validate(path: &str) -> BundleResult<String> {
    let unsafe_path = |reason: &str| {
        BundleError::validation(format!("unsafe path '{}': {}", path.escape_debug(), reason))
    };

    if path.is_empty() {
        return Err(unsafe_path("empty"));
    }
    if path.contains('\\') {
        return Err(unsafe_path("contains backslash"));
    }
    if path.contains('\0') {
        return Err(unsafe_path("contains NUL byte"));
    }
    if path.starts_with('/') {
        return Err(unsafe_path("absolute"));
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(unsafe_path("parent directory reference")),
            other => segments.push(other),
        }
    }

    match segments.first() {
        None => Err(unsafe_path("no path components")),
        Some(&first) if first == RESERVED_PREFIX => Err(unsafe_path("reserved metadata area")),
        Some(_) => Ok(segments.join("/")),
    }
}
