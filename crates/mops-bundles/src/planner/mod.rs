//! Storage planning: decide per file whether it lives in the registry or in
//! external storage, then build the layer indexes and bundle manifest.

mod spec;

pub use spec::{BundleSpec, ExternalRule, LayerSpec, BUNDLE_KIND, PATH_PLACEHOLDER};

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use globset::GlobMatcher;
use mops_store::ExternalUri;
use tracing::debug;
use walkdir::WalkDir;

use crate::digest::{sha256_hex_reader, DIGEST_PREFIX};
use crate::error::{BundleError, BundleResult};
use crate::model::{BundleManifest, ExternalDescriptor, LayerIndex, LayerIndexEntry, StorageTier};
use crate::path_safety::{self, RESERVED_PREFIX};

use spec::compile_glob;

/// Spec file names, in lookup order.
pub const SPEC_FILE_NAMES: [&str; 4] = [
    "modelops.yaml",
    "modelops.yml",
    ".mops-bundle.yaml",
    ".mops-bundle.yml",
];

/// A file selected for a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub src_path: PathBuf,
    /// Forward-slash path relative to the working directory.
    pub artifact_path: String,
    pub size: u64,
    /// Bare lowercase hex.
    pub sha256: String,
    pub layer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDecision {
    Oras,
    External { uri: String, tier: StorageTier },
}

/// Files of one layer, each paired with its decision. Built by [`plan_storage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPlan {
    name: String,
    /// Sorted by artifact path.
    planned: Vec<(FileEntry, StorageDecision)>,
}

impl LayerPlan {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.planned.iter().map(|(file, _)| file)
    }

    pub fn decision(&self, artifact_path: &str) -> Option<&StorageDecision> {
        self.planned
            .iter()
            .find(|(file, _)| file.artifact_path == artifact_path)
            .map(|(_, decision)| decision)
    }

    pub fn len(&self) -> usize {
        self.planned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planned.is_empty()
    }

    fn decided(&self) -> impl Iterator<Item = (&FileEntry, &StorageDecision)> {
        self.planned.iter().map(|(file, decision)| (file, decision))
    }
}

#[derive(Debug, Clone)]
pub struct StoragePlan {
    pub spec: BundleSpec,
    pub working_dir: PathBuf,
    /// In spec order.
    pub layers: Vec<LayerPlan>,
}

impl StoragePlan {
    pub fn layer(&self, name: &str) -> Option<&LayerPlan> {
        self.layers.iter().find(|l| l.name == name)
    }

    fn decided_files(&self) -> impl Iterator<Item = (&FileEntry, &StorageDecision)> {
        self.layers
            .iter()
            .flat_map(LayerPlan::decided)
    }

    pub fn oras_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.decided_files()
            .filter(|(_, d)| matches!(d, StorageDecision::Oras))
            .map(|(f, _)| f)
    }

    /// External files with their target URI and tier.
    pub fn external_files(&self) -> impl Iterator<Item = (&FileEntry, &str, StorageTier)> {
        self.decided_files().filter_map(|(f, d)| match d {
            StorageDecision::External { uri, tier } => Some((f, uri.as_str(), *tier)),
            StorageDecision::Oras => None,
        })
    }

    pub fn total_files(&self) -> usize {
        self.layers.iter().map(LayerPlan::len).sum()
    }
}

/// Locate and parse the bundle spec in `working_dir`.
pub fn scan_directory(working_dir: &Path) -> BundleResult<BundleSpec> {
    let found = SPEC_FILE_NAMES
        .iter()
        .map(|name| working_dir.join(name))
        .find(|candidate| candidate.is_file());

    match found {
        Some(path) => {
            debug!(spec = %path.display(), "found bundle spec");
            BundleSpec::from_yaml_file(&path)
        }
        None => Err(BundleError::not_found(format!(
            "bundle specification in {}: expected one of {}",
            working_dir.display(),
            SPEC_FILE_NAMES.join(", ")
        ))),
    }
}

/// Regular files under `working_dir` in sorted order, skipping the reserved area.
fn walk(working_dir: &Path) -> BundleResult<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(working_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == RESERVED_PREFIX));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(working_dir).to_path_buf();
            match e.into_io_error() {
                Some(io) => BundleError::io(path, io),
                None => BundleError::planning(format!("filesystem loop at {}", path.display())),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(working_dir)
            .map_err(|_| BundleError::planning(format!("{} escapes working dir", entry.path().display())))?;
        let artifact_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((path_safety::validate(&artifact_path)?, entry.into_path()));
    }
    Ok(files)
}

fn hash_file(path: &Path) -> BundleResult<(u64, String)> {
    let file = File::open(path).map_err(|e| BundleError::io(path, e))?;
    let size = file.metadata().map_err(|e| BundleError::io(path, e))?.len();
    let sha256 = sha256_hex_reader(file).map_err(|e| BundleError::io(path, e))?;
    Ok((size, sha256))
}

fn select_layer_files(layer: &LayerSpec, all: &[(String, PathBuf)]) -> BundleResult<Vec<FileEntry>> {
    let ignore = layer
        .ignore
        .iter()
        .map(|p| compile_glob(p, false))
        .collect::<BundleResult<Vec<GlobMatcher>>>()?;

    let mut seen = BTreeSet::new();
    let mut files = Vec::new();
    for pattern in &layer.files {
        let include = compile_glob(pattern, true)?;
        let mut matched = 0_usize;
        for (artifact_path, src_path) in all {
            if !include.is_match(artifact_path) || ignore.iter().any(|g| g.is_match(artifact_path)) {
                continue;
            }
            matched += 1;
            if !seen.insert(artifact_path.as_str()) {
                continue;
            }
            let (size, sha256) = hash_file(src_path)?;
            files.push(FileEntry {
                src_path: src_path.clone(),
                artifact_path: artifact_path.clone(),
                size,
                sha256,
                layer: layer.name.clone(),
            });
        }
        if matched == 0 {
            debug!(layer = %layer.name, pattern = %pattern, "pattern matched no files");
        }
    }

    files.sort_by(|a, b| a.artifact_path.cmp(&b.artifact_path));
    Ok(files)
}

struct RuleMatcher<'a> {
    rule: &'a ExternalRule,
    glob: GlobMatcher,
}

impl RuleMatcher<'_> {
    fn matches(&self, path: &str, size: u64) -> bool {
        let large_enough = match self.rule.size_threshold {
            Some(min) => size >= min,
            None => true,
        };
        large_enough && self.glob.is_match(path)
    }
}

fn decide(file: &FileEntry, rules: &[RuleMatcher<'_>], limit: u64) -> BundleResult<StorageDecision> {
    if let Some(m) = rules.iter().find(|m| m.matches(&file.artifact_path, file.size)) {
        let uri = m.rule.format_uri(&file.artifact_path);
        ExternalUri::parse(&uri).map_err(|e| {
            BundleError::planning(format!(
                "external rule '{}' produced an invalid URI for {}: {}",
                m.rule.pattern, file.artifact_path, e
            ))
        })?;
        return Ok(StorageDecision::External {
            uri,
            tier: m.rule.tier,
        });
    }

    if file.size > limit {
        return Err(BundleError::planning(format!(
            "{} ({} bytes) exceeds the ORAS limit of {} bytes and no external rule matches; add an external rule for it",
            file.artifact_path, file.size, limit
        )));
    }
    Ok(StorageDecision::Oras)
}

/// Scan `working_dir` and classify every selected file.
pub fn plan_storage(spec: &BundleSpec, working_dir: &Path) -> BundleResult<StoragePlan> {
    spec.validate()?;
    let all = walk(working_dir)?;
    let limit = spec.effective_oras_size_limit();
    let rules = spec
        .external_rules
        .iter()
        .map(|rule| Ok(RuleMatcher { rule, glob: compile_glob(&rule.pattern, false)? }))
        .collect::<BundleResult<Vec<_>>>()?;

    let mut layers = Vec::with_capacity(spec.layers.len());
    for layer_spec in &spec.layers {
        let planned = select_layer_files(layer_spec, &all)?
            .into_iter()
            .map(|file| {
                let decision = decide(&file, &rules, limit)?;
                Ok((file, decision))
            })
            .collect::<BundleResult<Vec<_>>>()?;
        debug!(layer = %layer_spec.name, files = planned.len(), "planned layer");
        layers.push(LayerPlan {
            name: layer_spec.name.clone(),
            planned,
        });
    }

    Ok(StoragePlan {
        spec: spec.clone(),
        working_dir: working_dir.to_path_buf(),
        layers,
    })
}

/// One index per layer, entries sorted by path.
pub fn create_layer_indexes(plan: &StoragePlan) -> BTreeMap<String, LayerIndex> {
    plan.layers
        .iter()
        .map(|layer| {
            let entries = layer
                .decided()
                .map(|(file, decision)| match decision {
                    StorageDecision::Oras => LayerIndexEntry::oras(
                        file.artifact_path.as_str(),
                        layer.name.as_str(),
                        format!("{}{}", DIGEST_PREFIX, file.sha256),
                        file.size,
                    ),
                    StorageDecision::External { uri, tier } => LayerIndexEntry::external(
                        file.artifact_path.as_str(),
                        layer.name.as_str(),
                        ExternalDescriptor {
                            uri: uri.clone(),
                            sha256: file.sha256.clone(),
                            size: file.size,
                            tier: Some(tier.as_str().to_string()),
                        },
                    ),
                })
                .collect();
            (layer.name.clone(), LayerIndex::new(layer.name.as_str(), entries))
        })
        .collect()
}

pub fn create_bundle_manifest(
    spec: &BundleSpec,
    indexes: &BTreeMap<String, LayerIndex>,
) -> BundleResult<BundleManifest> {
    let layers = indexes
        .iter()
        .map(|(name, index)| Ok((name.clone(), index.digest()?)))
        .collect::<BundleResult<BTreeMap<_, _>>>()?;
    let external_index_present = indexes
        .values()
        .any(|index| index.entries.iter().any(LayerIndexEntry::is_external));

    Ok(BundleManifest::new(
        spec.name.as_str(),
        spec.version.as_str(),
        spec.roles.clone(),
        layers,
        external_index_present,
    )
    .with_description(spec.description.clone()))
}

/// True unless `remote` has the same roles and layer index digests as the plan.
pub fn detect_changes(plan: &StoragePlan, remote: Option<&BundleManifest>) -> BundleResult<bool> {
    let Some(remote) = remote else {
        return Ok(true);
    };
    let local = create_bundle_manifest(&plan.spec, &create_layer_indexes(plan))?;
    Ok(local.layers != remote.layers || local.roles != remote.roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, data: &[u8]) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn spec(extra: &str) -> BundleSpec {
        BundleSpec::from_yaml(&format!(
            r#"
apiVersion: modelops/v1
kind: Bundle
name: demo
version: "1.0"
layers:
  - name: code
    type: code
    files: ["src/**/*.py", "*.yaml"]
    ignore: ["*_test.py"]
  - name: data
    type: data
    files: ["data/**"]
roles:
  default: [code]
  full: [code, data]
{extra}
"#
        ))
        .unwrap()
    }

    #[test]
    fn test_selection_respects_include_ignore_and_reserved_area() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/model.py", b"m");
        write(dir.path(), "src/pkg/util.py", b"u");
        write(dir.path(), "src/pkg/util_test.py", b"t");
        write(dir.path(), "notes.txt", b"n");
        write(dir.path(), "params.yaml", b"p");
        write(dir.path(), ".mops/ptr/x.json", b"{}");
        write(dir.path(), "data/a.csv", b"a");

        let plan = plan_storage(&spec(""), dir.path()).unwrap();
        let code: Vec<_> = plan.layer("code").unwrap().files().map(|f| f.artifact_path.as_str()).collect();
        assert_eq!(code, vec!["params.yaml", "src/model.py", "src/pkg/util.py"]);
        let data: Vec<_> = plan.layer("data").unwrap().files().map(|f| f.artifact_path.as_str()).collect();
        assert_eq!(data, vec!["data/a.csv"]);
        assert_eq!(plan.oras_files().count(), 4);
    }

    #[test]
    fn test_file_matched_by_two_layers_is_in_both() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "data/schema.yaml", b"s");
        let s = BundleSpec::from_yaml(
            r#"
apiVersion: modelops/v1
kind: Bundle
name: demo
version: "1.0"
layers:
  - {name: config, type: config, files: ["**/*.yaml"]}
  - {name: data, type: data, files: ["data/**"]}
roles: {default: [config, data]}
"#,
        )
        .unwrap();

        let plan = plan_storage(&s, dir.path()).unwrap();
        for layer in ["config", "data"] {
            let files: Vec<_> = plan.layer(layer).unwrap().files().collect();
            assert_eq!(files.len(), 1, "layer {layer}");
            assert_eq!(files[0].artifact_path, "data/schema.yaml");
            assert_eq!(files[0].layer, layer);
        }
        assert_eq!(plan.total_files(), 2);
        let indexes = create_layer_indexes(&plan);
        assert_eq!(indexes["data"].entries.len(), 1);
    }

    #[test]
    fn test_size_boundary() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "data/exact.bin", &[0_u8; 64]);
        let limited = spec("oras_size_limit: 64");
        let plan = plan_storage(&limited, dir.path()).unwrap();
        assert_eq!(plan.layer("data").unwrap().decision("data/exact.bin"), Some(&StorageDecision::Oras));

        write(dir.path(), "data/over.bin", &[0_u8; 65]);
        let err = plan_storage(&limited, dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("data/over.bin"));

        let with_rule = spec(
            r#"oras_size_limit: 64
external_rules:
  - pattern: "data/over.*"
    uri_template: "az://bucket/demo/{path}"
    tier: cool"#,
        );
        let plan = plan_storage(&with_rule, dir.path()).unwrap();
        let external: Vec<_> = plan.external_files().collect();
        assert_eq!(external.len(), 1);
        assert_eq!(external[0].0.artifact_path, "data/over.bin");
        assert_eq!(external[0].1, "az://bucket/demo/data/over.bin");
        assert_eq!(external[0].2, StorageTier::Cool);
    }

    #[test]
    fn test_rule_size_threshold() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "data/small.csv", b"1");
        write(dir.path(), "data/large.csv", &[b'x'; 100]);
        let s = spec(
            r#"external_rules:
  - pattern: "*.csv"
    uri_template: "s3://bucket/{path}"
    size_threshold: 50"#,
        );
        let plan = plan_storage(&s, dir.path()).unwrap();
        let data = plan.layer("data").unwrap();
        assert_eq!(data.decision("data/small.csv"), Some(&StorageDecision::Oras));
        assert!(matches!(data.decision("data/large.csv"), Some(StorageDecision::External { .. })));
        assert_eq!(data.decision("data/missing.csv"), None);
    }

    #[test]
    fn test_indexes_and_manifest() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/model.py", b"m");
        write(dir.path(), "data/big.parquet", &[1_u8; 10]);
        let s = spec(
            r#"external_rules:
  - pattern: "*.parquet"
    uri_template: "gs://b/{path}""#,
        );
        let plan = plan_storage(&s, dir.path()).unwrap();
        let indexes = create_layer_indexes(&plan);
        assert_eq!(indexes.len(), 2);
        assert!(indexes["data"].entries[0].is_external());
        assert_eq!(indexes["data"].entries[0].external.as_ref().unwrap().tier.as_deref(), Some("hot"));

        let manifest = create_bundle_manifest(&s, &indexes).unwrap();
        assert!(manifest.external_index_present);
        assert_eq!(manifest.layers["code"], indexes["code"].digest().unwrap());

        // Re-planning the same tree is stable.
        let again = create_bundle_manifest(&s, &create_layer_indexes(&plan_storage(&s, dir.path()).unwrap())).unwrap();
        assert_eq!(again.digest().unwrap(), manifest.digest().unwrap());
        assert!(!detect_changes(&plan, Some(&manifest)).unwrap());
        assert!(detect_changes(&plan, None).unwrap());

        write(dir.path(), "src/model.py", b"changed");
        let changed = plan_storage(&s, dir.path()).unwrap();
        assert!(detect_changes(&changed, Some(&manifest)).unwrap());
    }

    #[test]
    fn test_scan_directory() {
        let dir = TempDir::new().unwrap();
        assert_eq!(scan_directory(dir.path()).unwrap_err().exit_code(), 1);

        write(
            dir.path(),
            ".mops-bundle.yml",
            b"apiVersion: v1\nkind: Bundle\nname: x\nversion: '1'\nlayers: [{name: code, type: code, files: ['*.py']}]\nroles: {default: [code]}\n",
        );
        assert_eq!(scan_directory(dir.path()).unwrap().name, "x");

        write(dir.path(), "modelops.yaml", b"kind: [");
        let err = scan_directory(dir.path()).unwrap_err();
        assert!(err.to_string().contains("modelops.yaml"));
    }
}
