//! Developer-authored bundle specification (`modelops.yaml`).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_ORAS_SIZE_LIMIT;
use crate::error::{BundleError, BundleResult};
use crate::model::{BundleRef, StorageTier};

pub const BUNDLE_KIND: &str = "Bundle";

/// Placeholder substituted with the artifact path in external URI templates.
pub const PATH_PLACEHOLDER: &str = "{path}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    /// Free-form layer category (`code`, `data`, `config`, ...).
    #[serde(rename = "type")]
    pub layer_type: String,
    /// Include patterns, `**` allowed.
    pub files: Vec<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
}

/// Routes matching files to external storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRule {
    pub pattern: String,
    /// URI with a `{path}` placeholder, e.g. `az://data/{path}`.
    pub uri_template: String,
    #[serde(default)]
    pub tier: StorageTier,
    /// Minimum size in bytes for the rule to apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_threshold: Option<u64>,
}

impl ExternalRule {
    pub fn format_uri(&self, path: &str) -> String {
        self.uri_template.replace(PATH_PLACEHOLDER, path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSpec {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub layers: Vec<LayerSpec>,
    pub roles: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub external_rules: Vec<ExternalRule>,
    /// Unset means the configured limit applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oras_size_limit: Option<u64>,
}

#[derive(Deserialize)]
struct Metadata {
    name: String,
    version: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct SpecBody {
    layers: Vec<LayerSpec>,
    roles: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    external_rules: Vec<ExternalRule>,
    #[serde(default)]
    oras_size_limit: Option<u64>,
}

/// `apiVersion` + `kind` + `metadata` + `spec` layout.
#[derive(Deserialize)]
struct NestedSpec {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    metadata: Metadata,
    spec: SpecBody,
}

impl From<NestedSpec> for BundleSpec {
    fn from(nested: NestedSpec) -> Self {
        Self {
            api_version: nested.api_version,
            kind: nested.kind,
            name: nested.metadata.name,
            version: nested.metadata.version,
            description: nested.metadata.description,
            layers: nested.spec.layers,
            roles: nested.spec.roles,
            external_rules: nested.spec.external_rules,
            oras_size_limit: nested.spec.oras_size_limit,
        }
    }
}

impl BundleSpec {
    /// Parse and validate YAML in either the flat or the nested layout.
    pub fn from_yaml(text: &str) -> BundleResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| BundleError::validation(format!("invalid bundle spec YAML: {}", e)))?;

        let nested = value.get("spec").is_some();
        let spec = if nested {
            serde_yaml::from_value::<NestedSpec>(value).map(Self::from)
        } else {
            serde_yaml::from_value::<Self>(value)
        }
        .map_err(|e| BundleError::validation(format!("invalid bundle spec: {}", e)))?;

        spec.validate()?;
        Ok(spec)
    }

    pub fn from_yaml_file(path: &Path) -> BundleResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BundleError::io(path, e))?;
        Self::from_yaml(&text).map_err(|e| match e {
            BundleError::Validation { message } => BundleError::Validation {
                message: format!(
                    "failed to parse {}: {}",
                    path.file_name().unwrap_or_default().to_string_lossy(),
                    message
                ),
            },
            other => other,
        })
    }

    /// Limit in effect for this spec.
    pub fn effective_oras_size_limit(&self) -> u64 {
        self.oras_size_limit.unwrap_or(DEFAULT_ORAS_SIZE_LIMIT)
    }

    pub fn layer(&self, name: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn validate(&self) -> BundleResult<()> {
        if self.kind != BUNDLE_KIND {
            return Err(BundleError::validation(format!(
                "unsupported kind '{}': expected '{}'",
                self.kind, BUNDLE_KIND
            )));
        }
        BundleRef::named(self.name.as_str(), self.version.as_str())?;

        if self.layers.is_empty() {
            return Err(BundleError::validation("bundle spec declares no layers"));
        }

        let mut names = BTreeSet::new();
        for layer in &self.layers {
            if layer.name.trim().is_empty() {
                return Err(BundleError::validation("layer name cannot be empty"));
            }
            if !names.insert(layer.name.as_str()) {
                return Err(BundleError::validation(format!(
                    "duplicate layer name '{}'",
                    layer.name
                )));
            }
            for pattern in &layer.files {
                compile_glob(pattern, true)?;
            }
            for pattern in &layer.ignore {
                compile_glob(pattern, false)?;
            }
        }

        for (role, layers) in &self.roles {
            for layer in layers {
                if !names.contains(layer.as_str()) {
                    return Err(BundleError::validation(format!(
                        "role '{}' references unknown layer '{}'",
                        role, layer
                    )));
                }
            }
        }

        for rule in &self.external_rules {
            if !rule.uri_template.contains(PATH_PLACEHOLDER) {
                return Err(BundleError::validation(format!(
                    "uri_template '{}' must contain {}",
                    rule.uri_template, PATH_PLACEHOLDER
                )));
            }
            compile_glob(&rule.pattern, false)?;
        }

        if self.oras_size_limit == Some(0) {
            return Err(BundleError::validation("oras_size_limit must be positive"));
        }
        Ok(())
    }
}

/// Compile a pattern. Include patterns keep `*` within one path segment;
/// ignore and rule patterns let `*` cross `/`.
pub(crate) fn compile_glob(pattern: &str, literal_separator: bool) -> BundleResult<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(literal_separator)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| BundleError::validation(format!("invalid pattern '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAT: &str = r#"
apiVersion: modelops/v1
kind: Bundle
name: epi-sir
version: 1.2.0
description: SIR model
layers:
  - name: code
    type: code
    files: ["src/**/*.py"]
    ignore: ["*_test.py"]
  - name: data
    type: data
    files: ["data/**"]
roles:
  default: [code]
  training: [code, data]
external_rules:
  - pattern: "data/*.parquet"
    uri_template: "az://bundles/epi-sir/{path}"
    tier: cool
    size_threshold: 1024
"#;

    const NESTED: &str = r#"
apiVersion: modelops/v1
kind: Bundle
metadata:
  name: epi-sir
  version: 1.2.0
  description: SIR model
spec:
  layers:
    - name: code
      type: code
      files: ["src/**/*.py"]
      ignore: ["*_test.py"]
    - name: data
      type: data
      files: ["data/**"]
  roles:
    default: [code]
    training: [code, data]
  external_rules:
    - pattern: "data/*.parquet"
      uri_template: "az://bundles/epi-sir/{path}"
      tier: cool
      size_threshold: 1024
"#;

    #[test]
    fn test_flat_and_nested_forms_agree() {
        let flat = BundleSpec::from_yaml(FLAT).unwrap();
        let nested = BundleSpec::from_yaml(NESTED).unwrap();
        assert_eq!(flat, nested);
        assert_eq!(flat.external_rules[0].tier, StorageTier::Cool);
        assert_eq!(flat.effective_oras_size_limit(), DEFAULT_ORAS_SIZE_LIMIT);
        assert_eq!(
            flat.external_rules[0].format_uri("data/x.parquet"),
            "az://bundles/epi-sir/data/x.parquet"
        );
    }

    #[test]
    fn test_rejects_role_with_unknown_layer() {
        let bad = FLAT.replace("training: [code, data]", "training: [code, weights]");
        let err = BundleSpec::from_yaml(&bad).unwrap_err();
        assert!(err.to_string().contains("weights"));
    }

    #[test]
    fn test_rejects_duplicate_layers_and_bad_templates() {
        let dup = FLAT.replace("- name: data", "- name: code");
        assert!(BundleSpec::from_yaml(&dup).is_err());

        let no_placeholder = FLAT.replace("az://bundles/epi-sir/{path}", "az://bundles/fixed");
        assert!(BundleSpec::from_yaml(&no_placeholder).is_err());

        let wrong_kind = FLAT.replace("kind: Bundle", "kind: Deployment");
        assert!(BundleSpec::from_yaml(&wrong_kind).is_err());
    }

    #[test]
    fn test_glob_separator_modes() {
        let include = compile_glob("src/*.py", true).unwrap();
        assert!(include.is_match("src/a.py"));
        assert!(!include.is_match("src/pkg/a.py"));

        let ignore = compile_glob("*_test.py", false).unwrap();
        assert!(ignore.is_match("src/pkg/model_test.py"));
    }
}
