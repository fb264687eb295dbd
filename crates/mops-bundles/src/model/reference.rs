//! Bundle reference parsing.
//!
//! Supported forms:
//! - `epi-sir:1.2.0` → named bundle at a version tag
//! - `epi-sir@sha256:abc...` → pinned digest within the `epi-sir` repository
//! - `sha256:abc...` → pinned digest within the namespace repository
//! - `./bundles/epi-sir` or `/abs/path` → local directory

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::digest::parse_digest;
use crate::error::{BundleError, BundleResult};

/// Addressing mode of a [`BundleRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMode<'a> {
    Local(&'a Path),
    Digest {
        name: Option<&'a str>,
        digest: &'a str,
    },
    Named {
        name: &'a str,
        version: &'a str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Address {
    Local(PathBuf),
    Digest {
        name: Option<String>,
        digest: String,
    },
    Named {
        name: String,
        version: String,
    },
}

/// A bundle locator with exactly one addressing mode and an optional role hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBundleRef", into = "RawBundleRef")]
pub struct BundleRef {
    address: Address,
    role: Option<String>,
}

/// Flat wire form, as recorded in provenance.
#[derive(Clone, Serialize, Deserialize)]
struct RawBundleRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

impl TryFrom<RawBundleRef> for BundleRef {
    type Error = BundleError;

    fn try_from(raw: RawBundleRef) -> BundleResult<Self> {
        let base = match (raw.local_path, raw.digest, raw.name, raw.version) {
            (Some(path), None, None, None) => Self::local(path)?,
            (None, Some(digest), Some(name), None) => Self::pinned(name, digest)?,
            (None, Some(digest), None, None) => Self::digest(digest)?,
            (None, None, Some(name), Some(version)) => Self::named(name, version)?,
            _ => {
                return Err(BundleError::validation(
                    "bundle reference must specify exactly one of: local_path, digest, or name+version",
                ))
            }
        };
        match raw.role {
            Some(role) => base.with_role(role),
            None => Ok(base),
        }
    }
}

impl From<BundleRef> for RawBundleRef {
    fn from(r: BundleRef) -> Self {
        let mut raw = RawBundleRef {
            name: None,
            version: None,
            digest: None,
            local_path: None,
            role: r.role,
        };
        match r.address {
            Address::Local(path) => raw.local_path = Some(path),
            Address::Digest { name, digest } => {
                raw.name = name;
                raw.digest = Some(digest);
            }
            Address::Named { name, version } => {
                raw.name = Some(name);
                raw.version = Some(version);
            }
        }
        raw
    }
}

impl BundleRef {
    fn new(address: Address) -> Self {
        Self {
            address,
            role: None,
        }
    }

    /// Reference a bundle directory on the local filesystem.
    pub fn local(path: impl Into<PathBuf>) -> BundleResult<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(BundleError::validation("local bundle path cannot be empty"));
        }
        Ok(Self::new(Address::Local(path)))
    }

    /// Reference a bundle by manifest digest in the namespace repository.
    pub fn digest(digest: impl Into<String>) -> BundleResult<Self> {
        let digest = digest.into();
        parse_digest(&digest)?;
        Ok(Self::new(Address::Digest { name: None, digest }))
    }

    /// Reference a bundle by manifest digest within a named repository.
    pub fn pinned(name: impl Into<String>, digest: impl Into<String>) -> BundleResult<Self> {
        let name = name.into();
        let digest = digest.into();
        validate_name(&name)?;
        parse_digest(&digest)?;
        Ok(Self::new(Address::Digest {
            name: Some(name),
            digest,
        }))
    }

    /// Reference a bundle by name and version tag.
    pub fn named(name: impl Into<String>, version: impl Into<String>) -> BundleResult<Self> {
        let name = name.into();
        let version = version.into();
        validate_name(&name)?;
        validate_version(&version)?;
        Ok(Self::new(Address::Named { name, version }))
    }

    /// Attach a role hint, used when no explicit role is requested.
    pub fn with_role(mut self, role: impl Into<String>) -> BundleResult<Self> {
        let role = role.into();
        if role.trim().is_empty() {
            return Err(BundleError::validation("role hint cannot be empty"));
        }
        self.role = Some(role);
        Ok(self)
    }

    /// Parse a reference string.
    ///
    /// # Examples
    ///
    /// ```
    /// use mops_bundles::{BundleRef, RefMode};
    ///
    /// let named = BundleRef::parse("epi-sir:1.2.0").unwrap();
    /// assert!(matches!(named.mode(), RefMode::Named { name: "epi-sir", version: "1.2.0" }));
    ///
    /// let local = BundleRef::parse("./bundles/epi").unwrap();
    /// assert!(matches!(local.mode(), RefMode::Local(_)));
    ///
    /// assert!(BundleRef::parse("epi-sir").is_err());
    /// ```
    pub fn parse(reference: &str) -> BundleResult<Self> {
        let reference = reference.trim();

        if reference.is_empty() {
            return Err(BundleError::validation("empty bundle reference"));
        }

        if reference.starts_with("./") || reference.starts_with("../") || reference.starts_with('/') {
            return Self::local(reference);
        }

        if reference.starts_with("sha256:") {
            return Self::digest(reference);
        }

        if let Some((name, digest)) = reference.split_once('@') {
            return Self::pinned(name, digest);
        }

        if let Some((name, version)) = reference.split_once(':') {
            return Self::named(name, version);
        }

        Err(BundleError::validation(format!(
            "invalid bundle reference '{}': expected name:version, name@sha256:<hex>, sha256:<hex> or a ./path",
            reference
        )))
    }

    pub fn mode(&self) -> RefMode<'_> {
        match &self.address {
            Address::Local(path) => RefMode::Local(path),
            Address::Digest { name, digest } => RefMode::Digest {
                name: name.as_deref(),
                digest,
            },
            Address::Named { name, version } => RefMode::Named { name, version },
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.address {
            Address::Digest { name, .. } => name.as_deref(),
            Address::Named { name, .. } => Some(name),
            Address::Local(_) => None,
        }
    }

    pub fn version(&self) -> Option<&str> {
        match &self.address {
            Address::Named { version, .. } => Some(version),
            _ => None,
        }
    }

    pub fn digest_ref(&self) -> Option<&str> {
        match &self.address {
            Address::Digest { digest, .. } => Some(digest),
            _ => None,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.address {
            Address::Local(path) => Some(path),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }
}

/// OCI repository component rules: `[a-z0-9][a-z0-9._-]*`, no `/`.
fn validate_name(name: &str) -> BundleResult<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(BundleError::validation(format!(
            "invalid bundle name '{}': use lowercase letters, digits, '.', '_' or '-' (no '/')",
            name
        )))
    }
}

/// OCI tag rules: `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`.
fn validate_version(version: &str) -> BundleResult<()> {
    let mut chars = version.chars();
    let valid = version.len() <= 128
        && matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(BundleError::validation(format!(
            "invalid bundle version '{}': must be a valid OCI tag",
            version
        )))
    }
}

impl fmt::Display for BundleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode() {
            RefMode::Local(path) => write!(f, "{}", path.display()),
            RefMode::Digest {
                name: Some(name),
                digest,
            } => write!(f, "{}@{}", name, digest),
            RefMode::Digest { name: None, digest } => f.write_str(digest),
            RefMode::Named { name, version } => write!(f, "{}:{}", name, version),
        }
    }
}

impl FromStr for BundleRef {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
