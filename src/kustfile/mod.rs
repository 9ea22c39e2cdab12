//! # Kustomization descriptor
//!
//! The model of the kustomization file, its reader (with the key
//! normalization and fix-up rules applied on read) and its canonical-order
//! writer.
//!
//! Two filenames are accepted, `kustomization.yaml` preferred over the
//! legacy `kustomization.yml`. Neither or both present is fatal. Unknown
//! top-level keys are a warning, not an error; known keys spelled with the
//! wrong case are normalized before unmarshalling.

use crate::error::Error;
use crate::gvk::Gvk;
use crate::resid::ResId;
use crate::transform::image::Image;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Accepted descriptor file names, in preference order.
pub const KUSTOMIZATION_FILE_NAMES: &[&str] = &["kustomization.yaml", "kustomization.yml"];

pub const DEFAULT_API_VERSION: &str = "kustomize.config.k8s.io/v1beta1";
pub const DEFAULT_KIND: &str = "Kustomization";

/// The recognized top-level fields, in the canonical emit order. The
/// struct below declares its fields in the same order, which is what the
/// writer serializes.
const FIELD_NAMES: &[&str] = &[
    "apiVersion",
    "kind",
    "resources",
    "bases",
    "namePrefix",
    "nameSuffix",
    "namespace",
    "crds",
    "commonLabels",
    "commonAnnotations",
    "patchesStrategicMerge",
    "patchesJson6902",
    "patches",
    "configMapGenerator",
    "secretGenerator",
    "generatorOptions",
    "vars",
    "images",
    "replicas",
    "configurations",
    "generators",
    "transformers",
    "inventory",
];

/// A reference to a single resource by Gvk, name and namespace; used by
/// patch targets and variable objrefs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl Target {
    pub fn to_res_id(&self) -> ResId {
        let gvk = if !self.api_version.is_empty() {
            Gvk::from_api_version_and_kind(&self.api_version, &self.kind)
        } else {
            Gvk::new(&self.group, &self.version, &self.kind)
        };
        ResId::with_namespace(gvk, &self.name, &self.namespace)
    }
}

/// Where a variable reads its value from; defaults to the referent's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    #[serde(rename = "fieldpath", alias = "fieldPath")]
    pub field_path: String,
}

impl Default for FieldRef {
    fn default() -> Self {
        FieldRef {
            field_path: "metadata.name".to_string(),
        }
    }
}

/// A named reference to a field of exactly one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Var {
    pub name: String,
    pub objref: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldref: Option<FieldRef>,
    #[serde(
        rename = "default",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_value: Option<String>,
}

impl Var {
    pub fn field_path(&self) -> String {
        self.fieldref.clone().unwrap_or_default().field_path
    }
}

/// An entry of the generic `patches` list: either a bare path (promoted to
/// `patchesStrategicMerge` by the fix rules) or a targeted patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchEntry {
    Path(String),
    Targeted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        patch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Target>,
    },
}

/// An entry of `patchesJson6902`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchJson6902Entry {
    pub target: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_op: Option<String>,
}

/// Key/value sources shared by the ConfigMap and Secret generators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorArgs {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub behavior: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub literals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

/// `secretGenerator` adds a secret type on top of the shared arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretArgs {
    #[serde(flatten)]
    pub generator_args: GeneratorArgs,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub secret_type: String,
}

/// Options applied to every generated resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorOptions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub disable_name_suffix_hash: bool,
}

/// A replica-count override for a named workload. Carried in the model
/// for round-tripping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryConfigMap {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Declares the inventory object recorded alongside the build output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub inventory_type: String,
    #[serde(default, skip_serializing_if = "is_default_inventory_cm")]
    pub config_map: InventoryConfigMap,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy: String,
}

fn is_default_inventory_cm(cm: &InventoryConfigMap) -> bool {
    cm.name.is_empty() && cm.namespace.is_empty()
}

/// The kustomization descriptor. Field declaration order is the canonical
/// emit order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Kustomization {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name_prefix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name_suffix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub crds: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub common_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patches_strategic_merge: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patches_json6902: Vec<PatchJson6902Entry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub config_map_generator: Vec<GeneratorArgs>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secret_generator: Vec<SecretArgs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_options: Option<GeneratorOptions>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<Var>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replicas: Vec<Replica>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub generators: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Inventory>,
}

impl Kustomization {
    /// Parse descriptor bytes, normalizing key spelling first and applying
    /// the post-unmarshal fix rules.
    pub fn from_bytes(bytes: &[u8]) -> Result<Kustomization> {
        let value: Value = serde_yaml::from_slice(bytes)
            .map_err(|e| Error::MalformedInput(format!("kustomization file: {e}")))?;
        let Value::Mapping(mapping) = value else {
            return Err(
                Error::MalformedInput("kustomization file is not a mapping".to_string()).into(),
            );
        };
        let normalized = normalize_keys(mapping);
        let mut kustomization: Kustomization = serde_yaml::from_value(Value::Mapping(normalized))
            .map_err(|e| Error::MalformedInput(format!("kustomization file: {e}")))?;
        kustomization.fix_post_unmarshalling();
        Ok(kustomization)
    }

    /// The fix-patches-field rule plus apiVersion/kind defaulting.
    pub fn fix_post_unmarshalling(&mut self) {
        let mut kept = Vec::new();
        for entry in self.patches.drain(..) {
            match entry {
                PatchEntry::Path(path) => self.patches_strategic_merge.push(path),
                targeted @ PatchEntry::Targeted { .. } => kept.push(targeted),
            }
        }
        self.patches = kept;
        if self.api_version.is_empty() {
            self.api_version = DEFAULT_API_VERSION.to_string();
        }
        if self.kind.is_empty() {
            self.kind = DEFAULT_KIND.to_string();
        }
    }

    /// Serialize in canonical field order, emitting only present fields.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("serializing kustomization file")
    }
}

/// Normalize top-level keys: a case-insensitive match against a known
/// field name is rewritten to the canonical spelling; anything else is
/// kept and warned about.
fn normalize_keys(mapping: Mapping) -> Mapping {
    let mut normalized = Mapping::new();
    for (key, value) in mapping {
        let Some(key_str) = key.as_str() else {
            normalized.insert(key, value);
            continue;
        };
        match FIELD_NAMES
            .iter()
            .find(|known| known.eq_ignore_ascii_case(key_str))
        {
            Some(canonical) => {
                normalized.insert(Value::from(*canonical), value);
            }
            None => {
                warn!("ignoring unknown kustomization field {key_str:?}");
                normalized.insert(key, value);
            }
        }
    }
    normalized
}

/// Pick the descriptor file in a directory listing. Exactly one of the
/// accepted names must be present.
pub fn descriptor_name(present: &[String], dir_display: &str) -> Result<String> {
    let found: Vec<&str> = KUSTOMIZATION_FILE_NAMES
        .iter()
        .copied()
        .filter(|name| present.iter().any(|p| p == name))
        .collect();
    match found.len() {
        0 => Err(Error::NotFound(format!(
            "missing kustomization file in directory {dir_display}"
        ))
        .into()),
        1 => Ok(found[0].to_string()),
        _ => Err(Error::Conflict(format!(
            "found multiple kustomization files in directory {dir_display}"
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_patches_promote_to_strategic_merge() {
        let k = Kustomization::from_bytes(b"patches:\n- patch1.yaml\n- patch2.yaml\n").unwrap();
        assert_eq!(k.patches_strategic_merge, vec!["patch1.yaml", "patch2.yaml"]);
        assert!(k.patches.is_empty());
        assert_eq!(k.api_version, DEFAULT_API_VERSION);
        assert_eq!(k.kind, DEFAULT_KIND);
    }

    #[test]
    fn targeted_patches_stay_in_place() {
        let k = Kustomization::from_bytes(
            b"patches:\n- path: patch1.yaml\n  target:\n    kind: Deployment\n- path: patch2.yaml\n  target:\n    kind: Service\n",
        )
        .unwrap();
        assert!(k.patches_strategic_merge.is_empty());
        assert_eq!(k.patches.len(), 2);
        match &k.patches[0] {
            PatchEntry::Targeted { path, target, .. } => {
                assert_eq!(path.as_deref(), Some("patch1.yaml"));
                assert_eq!(target.as_ref().unwrap().kind, "Deployment");
            }
            other => panic!("expected targeted entry, got {other:?}"),
        }
    }

    #[test]
    fn miscased_keys_are_normalized() {
        let k = Kustomization::from_bytes(
            b"RESOURCES:\n- pod.yaml\nNamePrefix: dev-\n",
        )
        .unwrap();
        assert_eq!(k.resources, vec!["pod.yaml"]);
        assert_eq!(k.name_prefix, "dev-");
    }

    #[test]
    fn writer_emits_canonical_order() {
        let mut k = Kustomization {
            namespace: "prod".to_string(),
            resources: vec!["a.yaml".to_string()],
            ..Kustomization::default()
        };
        k.fix_post_unmarshalling();
        let yaml = k.to_yaml().unwrap();
        let api_pos = yaml.find("apiVersion:").unwrap();
        let resources_pos = yaml.find("resources:").unwrap();
        let namespace_pos = yaml.find("namespace:").unwrap();
        assert!(api_pos < resources_pos && resources_pos < namespace_pos);
        assert!(!yaml.contains("commonLabels"));
    }

    #[test]
    fn round_trip_preserves_model() {
        let original = Kustomization::from_bytes(
            b"namePrefix: prefix\nvars:\n- name: SVC\n  objref:\n    kind: Service\n    name: my-service\n    apiVersion: v1\n  fieldref:\n    fieldpath: metadata.name\n",
        )
        .unwrap();
        let rewritten = Kustomization::from_bytes(original.to_yaml().unwrap().as_bytes()).unwrap();
        assert_eq!(original, rewritten);
    }

    #[test]
    fn descriptor_name_selection() {
        let dir = "/app";
        assert!(descriptor_name(&[], dir).is_err());
        assert_eq!(
            descriptor_name(&["kustomization.yml".to_string()], dir).unwrap(),
            "kustomization.yml"
        );
        assert_eq!(
            descriptor_name(
                &["kustomization.yaml".to_string(), "other.yaml".to_string()],
                dir
            )
            .unwrap(),
            "kustomization.yaml"
        );
        let both = vec![
            "kustomization.yaml".to_string(),
            "kustomization.yml".to_string(),
        ];
        assert!(descriptor_name(&both, dir).is_err());
    }

    #[test]
    fn var_fieldref_defaults_to_name() {
        let k = Kustomization::from_bytes(
            b"vars:\n- name: X\n  objref:\n    kind: Service\n    name: s\n",
        )
        .unwrap();
        assert_eq!(k.vars[0].field_path(), "metadata.name");
    }
}
