//! Bundle configuration.
//!
//! Built once per operation and passed by reference. Nothing here reads the
//! environment except [`BundleConfig::from_env`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, BundleResult};

/// Default ceiling for registry-stored files (100 MB).
pub const DEFAULT_ORAS_SIZE_LIMIT: u64 = 100_000_000;

/// Default zstd level for exported archives.
pub const DEFAULT_ZSTD_LEVEL: i32 = 19;

/// Bundle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Registry namespace; bundles live under `<registry_repo>/bundles/<name>`.
    #[serde(default = "default_registry_repo")]
    pub registry_repo: String,

    /// Root for per-digest cache directories. `None` disables cache preparation.
    #[serde(default)]
    pub cache_root: Option<PathBuf>,

    /// Files larger than this need an external rule.
    #[serde(default = "default_oras_size_limit")]
    pub oras_size_limit: u64,

    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

fn default_registry_repo() -> String {
    "modelops".to_string()
}

fn default_oras_size_limit() -> u64 {
    DEFAULT_ORAS_SIZE_LIMIT
}

fn default_zstd_level() -> i32 {
    DEFAULT_ZSTD_LEVEL
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            registry_repo: default_registry_repo(),
            cache_root: None,
            oras_size_limit: default_oras_size_limit(),
            zstd_level: default_zstd_level(),
        }
    }
}

impl BundleConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `MODELOPS_REGISTRY_REPO` | Registry namespace |
    /// | `MODELOPS_CACHE_DIR` | Cache root |
    /// | `MODELOPS_ORAS_SIZE_LIMIT` | ORAS ceiling in bytes |
    /// | `MODELOPS_ZSTD_LEVEL` | Archive compression level |
    pub fn from_env() -> Self {
        Self {
            registry_repo: std::env::var("MODELOPS_REGISTRY_REPO")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_registry_repo),
            cache_root: std::env::var_os("MODELOPS_CACHE_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            oras_size_limit: std::env::var("MODELOPS_ORAS_SIZE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_oras_size_limit),
            zstd_level: std::env::var("MODELOPS_ZSTD_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_zstd_level),
        }
    }

    /// Set the registry namespace.
    pub fn with_registry_repo(mut self, repo: impl Into<String>) -> Self {
        self.registry_repo = repo.into();
        self
    }

    /// Set the cache root.
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    pub fn with_oras_size_limit(mut self, limit: u64) -> Self {
        self.oras_size_limit = limit;
        self
    }

    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    /// Check the namespace against OCI repository naming and the zstd level range.
    pub fn validate(&self) -> BundleResult<()> {
        if !is_oci_repository(&self.registry_repo) {
            return Err(BundleError::validation(format!(
                "invalid registry_repo '{}': must follow OCI naming conventions",
                self.registry_repo
            )));
        }
        if !(1..=22).contains(&self.zstd_level) {
            return Err(BundleError::validation(format!(
                "zstd_level must be between 1 and 22, got {}",
                self.zstd_level
            )));
        }
        Ok(())
    }
}

/// `[a-z0-9][a-z0-9._-]*` components joined by `/`.
fn is_oci_repository(repo: &str) -> bool {
    !repo.is_empty()
        && repo.split('/').all(|component| {
            let mut chars = component.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit())
                && chars.all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
                })
        })
}

/// Repository for a named bundle: `<registry_repo>/bundles/<name>`.
pub fn build_repository(config: &BundleConfig, name: &str) -> BundleResult<String> {
    if name.is_empty() {
        return Err(BundleError::validation("bundle name cannot be empty"));
    }
    Ok(format!("{}/bundles/{}", config.registry_repo, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BundleConfig::default();
        assert_eq!(config.oras_size_limit, 100_000_000);
        assert_eq!(config.zstd_level, 19);
        assert!(config.cache_root.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: BundleConfig = serde_json::from_str(r#"{"registry_repo":"acme/ml"}"#).unwrap();
        assert_eq!(config.registry_repo, "acme/ml");
        assert_eq!(config.oras_size_limit, DEFAULT_ORAS_SIZE_LIMIT);
    }

    #[test]
    fn test_validate_repo_names() {
        for good in ["modelops", "acme/ml-prod", "a.b_c/d-e/0"] {
            BundleConfig::default()
                .with_registry_repo(good)
                .validate()
                .unwrap();
        }
        for bad in ["", "Acme", "acme//ml", "/acme", "acme/", "-acme", "acme:5000/x"] {
            assert!(
                BundleConfig::default()
                    .with_registry_repo(bad)
                    .validate()
                    .is_err(),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_validate_zstd_level() {
        assert!(BundleConfig::default().with_zstd_level(0).validate().is_err());
        assert!(BundleConfig::default().with_zstd_level(23).validate().is_err());
    }

    #[test]
    fn test_build_repository() {
        let config = BundleConfig::default().with_registry_repo("acme/prod");
        assert_eq!(
            build_repository(&config, "epi-sir").unwrap(),
            "acme/prod/bundles/epi-sir"
        );
        assert!(build_repository(&config, "").is_err());
    }
}
