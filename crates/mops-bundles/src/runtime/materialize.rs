use std::path::Path;

use futures::TryStreamExt;
use mops_store::BundleRegistry;
use tracing::{debug, info};

use crate::config::BundleConfig;
use crate::digest::sha256_hex;
use crate::error::{BundleError, BundleResult, Conflict, ConflictReason};
use crate::fsio::{file_sha256, write_atomic};
use crate::model::{BundleRef, EntryKind, MatEntry, ResolvedBundle};
use crate::path_safety;
use crate::pointer::{write_pointer, PointerFile};
use crate::provider::ContentProvider;
use crate::runtime::provenance::{write_provenance, Provenance};
use crate::runtime::resolve::resolve;

/// Name of the role chosen when neither the caller nor the reference names one.
const DEFAULT_ROLE: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    /// Overrides the reference's role hint.
    pub role: Option<String>,
    /// Replace conflicting files instead of failing.
    pub overwrite: bool,
    /// Download external data in addition to writing pointers.
    pub prefetch_external: bool,
}

impl MaterializeOptions {
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn prefetch_external(mut self, prefetch: bool) -> Self {
        self.prefetch_external = prefetch;
        self
    }
}

/// Choose a role and return it with its layers.
///
/// Precedence: `explicit`, then the reference's hint, then `"default"`.
pub fn select_role(
    resolved: &ResolvedBundle,
    explicit: Option<&str>,
) -> BundleResult<(String, Vec<String>)> {
    let role = explicit
        .or_else(|| resolved.bundle_ref.role())
        .or_else(|| resolved.roles.contains_key(DEFAULT_ROLE).then_some(DEFAULT_ROLE));

    let Some(role) = role else {
        return Err(BundleError::RoleMismatch {
            message: "no role specified and bundle has no 'default' role".into(),
            available: resolved.role_names(),
        });
    };

    let layers = resolved
        .roles
        .get(role)
        .ok_or_else(|| BundleError::RoleMismatch {
            message: format!("role '{}' not found in bundle", role),
            available: resolved.role_names(),
        })?;

    let missing: Vec<&str> = layers
        .iter()
        .filter(|layer| !resolved.has_layer(layer))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(BundleError::RoleMismatch {
            message: format!(
                "role '{}' references missing layer(s): {}",
                role,
                missing.join(", ")
            ),
            available: resolved.role_names(),
        });
    }

    Ok((role.to_string(), layers.clone()))
}

/// State of a destination path relative to an expected hash.
enum Existing {
    Absent,
    Identical,
    Conflicting(ConflictReason),
}

async fn inspect(target: &Path, expected: &str) -> Existing {
    let unreadable = || {
        Existing::Conflicting(ConflictReason::Unreadable {
            expected: expected.to_string(),
        })
    };

    match tokio::fs::metadata(target).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Existing::Absent,
        Err(_) => unreadable(),
        Ok(meta) if meta.is_dir() => Existing::Conflicting(ConflictReason::DirectoryInPlace),
        Ok(_) => match file_sha256(target).await {
            Ok(actual) if actual == expected => Existing::Identical,
            Ok(actual) => Existing::Conflicting(ConflictReason::ContentMismatch {
                expected: expected.to_string(),
                actual,
            }),
            Err(_) => unreadable(),
        },
    }
}

#[derive(Debug, Default)]
struct Counts {
    written: usize,
    unchanged: usize,
    replaced: usize,
    pointers: usize,
}

/// Outcome of placing one data file.
enum Placement {
    Written,
    Unchanged,
    Replaced,
    Conflict,
    /// Fetched bytes failed verification and were discarded.
    Corrupt,
}

struct Materializer<'a> {
    dest: &'a Path,
    resolved: &'a ResolvedBundle,
    provider: &'a dyn ContentProvider,
    options: &'a MaterializeOptions,
    conflicts: Vec<Conflict>,
    integrity: Vec<Conflict>,
    counts: Counts,
}

impl Materializer<'_> {
    /// Fetch the entry's bytes, returning `None` after recording an integrity conflict.
    async fn fetch_verified(&mut self, entry: &MatEntry) -> BundleResult<Option<bytes::Bytes>> {
        let data = self.provider.fetch(self.resolved, entry).await?;
        let actual = sha256_hex(&data);
        if actual != entry.sha256() {
            self.integrity.push(Conflict::new(
                entry.path(),
                ConflictReason::IntegrityMismatch {
                    expected: entry.sha256().to_string(),
                    actual,
                },
            ));
            return Ok(None);
        }
        Ok(Some(data))
    }

    async fn place(&mut self, entry: &MatEntry) -> BundleResult<Placement> {
        let target = self.dest.join(entry.path());

        let replacing = match inspect(&target, entry.sha256()).await {
            Existing::Identical => return Ok(Placement::Unchanged),
            Existing::Absent => false,
            Existing::Conflicting(reason) if !self.options.overwrite => {
                self.conflicts.push(Conflict::new(entry.path(), reason));
                return Ok(Placement::Conflict);
            }
            Existing::Conflicting(reason) => {
                if matches!(reason, ConflictReason::DirectoryInPlace) {
                    tokio::fs::remove_dir_all(&target)
                        .await
                        .map_err(|e| BundleError::io(&target, e))?;
                }
                true
            }
        };

        let Some(data) = self.fetch_verified(entry).await? else {
            return Ok(Placement::Corrupt);
        };
        write_atomic(&target, &data).await?;

        Ok(if replacing {
            Placement::Replaced
        } else {
            Placement::Written
        })
    }

    fn count(&mut self, placement: &Placement) {
        match placement {
            Placement::Written => self.counts.written += 1,
            Placement::Unchanged => self.counts.unchanged += 1,
            Placement::Replaced => self.counts.replaced += 1,
            Placement::Conflict | Placement::Corrupt => {}
        }
    }

    async fn process(&mut self, entry: &MatEntry) -> BundleResult<()> {
        match entry.kind() {
            EntryKind::Oras => {
                let placement = self.place(entry).await?;
                self.count(&placement);
                debug!(path = entry.path(), kind = %entry.kind(), "placed entry");
            }
            EntryKind::External => {
                let mut pointer = PointerFile::new(
                    entry.path(),
                    entry.layer(),
                    entry.uri().unwrap_or_default(),
                    entry.sha256(),
                    entry.size(),
                )
                .with_tier(entry.tier().map(str::to_string));

                if self.options.prefetch_external {
                    let placement = self.place(entry).await?;
                    self.count(&placement);
                    match placement {
                        Placement::Corrupt => return Ok(()),
                        // Conflicting local copy: the pointer stays unfulfilled.
                        Placement::Conflict => {}
                        Placement::Written | Placement::Unchanged | Placement::Replaced => {
                            pointer = pointer.with_local_copy(entry.path());
                        }
                    }
                }

                write_pointer(self.dest, &pointer).await?;
                self.counts.pointers += 1;
                debug!(
                    path = entry.path(),
                    fulfilled = pointer.fulfilled,
                    "recorded external entry"
                );
            }
        }
        Ok(())
    }
}

/// Collect, sort and validate the provider's entries; reject duplicate paths.
async fn collect_entries(
    provider: &dyn ContentProvider,
    resolved: &ResolvedBundle,
    layers: &[String],
) -> BundleResult<Vec<MatEntry>> {
    let mut entries: Vec<MatEntry> = provider.iter_entries(resolved, layers).try_collect().await?;
    for entry in &entries {
        path_safety::validate(entry.path())?;
    }
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    let duplicates: Vec<Conflict> = entries
        .windows(2)
        .filter(|pair| pair[0].path() == pair[1].path())
        .map(|pair| {
            Conflict::new(
                pair[1].path(),
                ConflictReason::DuplicatePath {
                    first_layer: pair[0].layer().to_string(),
                    duplicate_layer: pair[1].layer().to_string(),
                },
            )
        })
        .collect();
    if !duplicates.is_empty() {
        return Err(BundleError::WorkdirConflict {
            conflicts: duplicates,
        });
    }

    Ok(entries)
}

/// Materialize the selected role of `bundle_ref` into `dest`.
///
/// Reference, manifest and role errors abort before the destination is
/// touched. Conflicts are gathered over every entry and reported together.
/// Fetched bytes that fail verification are never written and fail the call
/// even with `overwrite`.
pub async fn materialize(
    bundle_ref: &BundleRef,
    dest: &Path,
    options: &MaterializeOptions,
    registry: &dyn BundleRegistry,
    provider: &dyn ContentProvider,
    config: &BundleConfig,
) -> BundleResult<ResolvedBundle> {
    let resolved = resolve(bundle_ref, registry, config, false).await?;
    let (role, layers) = select_role(&resolved, options.role.as_deref())?;
    let entries = collect_entries(provider, &resolved, &layers).await?;

    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| BundleError::io(dest, e))?;

    let mut run = Materializer {
        dest,
        resolved: &resolved,
        provider,
        options,
        conflicts: Vec::new(),
        integrity: Vec::new(),
        counts: Counts::default(),
    };
    for entry in &entries {
        run.process(entry).await?;
    }

    let mut conflicts = run.integrity;
    if !options.overwrite {
        conflicts.append(&mut run.conflicts);
    }
    if !conflicts.is_empty() {
        conflicts.sort_by(|a, b| a.path.cmp(&b.path));
        return Err(BundleError::WorkdirConflict { conflicts });
    }

    write_provenance(dest, &Provenance::new(&resolved, &role)).await?;

    info!(
        bundle = %bundle_ref,
        role = %role,
        digest = %resolved.manifest_digest,
        entries = entries.len(),
        written = run.counts.written,
        unchanged = run.counts.unchanged,
        replaced = run.counts.replaced,
        pointers = run.counts.pointers,
        "materialized bundle"
    );

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn resolved(roles: &[(&str, &[&str])], layers: &[&str], hint: Option<&str>) -> ResolvedBundle {
        let mut bundle_ref = BundleRef::named("demo", "1.0").unwrap();
        if let Some(hint) = hint {
            bundle_ref = bundle_ref.with_role(hint).unwrap();
        }
        ResolvedBundle {
            bundle_ref,
            repository: "modelops/bundles/demo".into(),
            manifest_digest: format!("sha256:{}", "0".repeat(64)),
            media_type: crate::model::BUNDLE_MANIFEST_MEDIA_TYPE.into(),
            roles: roles
                .iter()
                .map(|(r, ls)| (r.to_string(), ls.iter().map(|l| l.to_string()).collect()))
                .collect(),
            layers: layers.iter().map(|l| l.to_string()).collect(),
            layer_indexes: layers
                .iter()
                .map(|l| (l.to_string(), format!("sha256:{}", "1".repeat(64))))
                .collect::<BTreeMap<_, _>>(),
            external_index_present: false,
            total_size: 0,
            cache_dir: None,
        }
    }

    #[test]
    fn test_role_precedence() {
        let roles: &[(&str, &[&str])] = &[
            ("default", &["code"]),
            ("sim", &["code", "data"]),
            ("train", &["data"]),
        ];
        let with_hint = resolved(roles, &["code", "data"], Some("sim"));

        assert_eq!(select_role(&with_hint, Some("train")).unwrap().0, "train");
        assert_eq!(select_role(&with_hint, None).unwrap().0, "sim");

        let no_hint = resolved(roles, &["code", "data"], None);
        assert_eq!(select_role(&no_hint, None).unwrap(), ("default".into(), vec!["code".into()]));
    }

    #[test]
    fn test_no_resolvable_role_lists_available() {
        let r = resolved(&[("sim", &["code"]), ("train", &["code"])], &["code"], None);
        match select_role(&r, None).unwrap_err() {
            BundleError::RoleMismatch { available, .. } => {
                assert_eq!(available, vec!["sim".to_string(), "train".to_string()])
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            select_role(&r, Some("ghost")),
            Err(BundleError::RoleMismatch { .. })
        ));
    }

    #[test]
    fn test_role_with_missing_layer() {
        let r = resolved(&[("default", &["code", "weights"])], &["code"], None);
        let err = select_role(&r, None).unwrap_err();
        assert_eq!(err.exit_code(), 11);
        assert!(err.to_string().contains("weights"));
    }
}
