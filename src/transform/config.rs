//! # Transformer configuration
//!
//! Field specs tell path-driven transformers where to act; a
//! [`TransformerConfig`] groups them by intent. A default configuration
//! ships with the program and can be augmented by user-supplied
//! `configurations` files and by CRD-derived additions.

use crate::error::Error;
use crate::gvk::Gvk;
use crate::resid::ResId;
use crate::transform::{parse_path, PathSegment};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// A (Gvk selector, path, create-if-not-present) directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(flatten)]
    pub gvk: Gvk,
    #[serde(default)]
    pub path: String,
    #[serde(default, rename = "create")]
    pub create_if_not_present: bool,
}

impl FieldSpec {
    pub fn new(gvk: Gvk, path: &str, create: bool) -> Self {
        FieldSpec {
            gvk,
            path: path.to_string(),
            create_if_not_present: create,
        }
    }

    /// Shorthand for a spec that applies to every kind.
    pub fn any(path: &str, create: bool) -> Self {
        FieldSpec::new(Gvk::default(), path, create)
    }

    /// Shorthand for a kind-restricted spec.
    pub fn kind(kind: &str, path: &str, create: bool) -> Self {
        FieldSpec::new(Gvk::from_kind(kind), path, create)
    }

    pub fn applies_to(&self, id: &ResId) -> bool {
        id.gvk.is_selected(&self.gvk)
    }

    pub fn segments(&self) -> Result<Vec<PathSegment>> {
        parse_path(&self.path)
            .with_context(|| format!("parsing field spec path {:?}", self.path))
    }
}

/// All referrers of one target kind: field specs naming the paths in other
/// kinds that hold this kind's name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameBackReferences {
    #[serde(flatten)]
    pub gvk: Gvk,
    #[serde(default, rename = "fieldSpecs")]
    pub field_specs: Vec<FieldSpec>,
}

/// Field specs grouped by transformer intent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformerConfig {
    pub name_prefix: Vec<FieldSpec>,
    pub common_labels: Vec<FieldSpec>,
    pub common_annotations: Vec<FieldSpec>,
    pub name_reference: Vec<NameBackReferences>,
    pub var_reference: Vec<FieldSpec>,
    pub images: Vec<FieldSpec>,
    pub namespace: Vec<FieldSpec>,
}

impl TransformerConfig {
    /// Parse a user configuration file and validate its paths.
    pub fn from_bytes(bytes: &[u8]) -> Result<TransformerConfig> {
        let config: TransformerConfig = serde_yaml::from_slice(bytes)
            .map_err(|e| Error::MalformedInput(format!("transformer configuration: {e}")))?;
        for spec in config
            .name_prefix
            .iter()
            .chain(&config.common_labels)
            .chain(&config.common_annotations)
            .chain(&config.var_reference)
            .chain(&config.images)
            .chain(&config.namespace)
            .chain(config.name_reference.iter().flat_map(|b| &b.field_specs))
        {
            spec.segments()?;
        }
        Ok(config)
    }

    /// Union another configuration into this one, dropping duplicates.
    pub fn merge(&mut self, other: TransformerConfig) {
        merge_specs(&mut self.name_prefix, other.name_prefix);
        merge_specs(&mut self.common_labels, other.common_labels);
        merge_specs(&mut self.common_annotations, other.common_annotations);
        merge_specs(&mut self.var_reference, other.var_reference);
        merge_specs(&mut self.images, other.images);
        merge_specs(&mut self.namespace, other.namespace);
        for backref in other.name_reference {
            match self
                .name_reference
                .iter_mut()
                .find(|b| b.gvk == backref.gvk)
            {
                Some(existing) => merge_specs(&mut existing.field_specs, backref.field_specs),
                None => self.name_reference.push(backref),
            }
        }
    }
}

fn merge_specs(into: &mut Vec<FieldSpec>, from: Vec<FieldSpec>) {
    for spec in from {
        if !into.contains(&spec) {
            into.push(spec);
        }
    }
}

/// The configuration shipped with the program.
pub fn default_config() -> &'static TransformerConfig {
    static DEFAULT: Lazy<TransformerConfig> = Lazy::new(build_default_config);
    &DEFAULT
}

/// Pod-spec locations, at top level and under the common template paths.
const POD_SPEC_PREFIXES: &[&str] = &[
    "spec",
    "spec.template.spec",
    "spec.jobTemplate.spec.template.spec",
];

const CONTAINER_LISTS: &[&str] = &["containers", "initContainers"];

fn build_default_config() -> TransformerConfig {
    let mut config = TransformerConfig {
        name_prefix: vec![FieldSpec::any("metadata.name", false)],
        ..TransformerConfig::default()
    };

    config.common_labels = vec![
        FieldSpec::any("metadata.labels", true),
        FieldSpec::kind("Service", "spec.selector", true),
        FieldSpec::kind("ReplicationController", "spec.selector", true),
        FieldSpec::kind("Deployment", "spec.selector.matchLabels", true),
        FieldSpec::kind("ReplicaSet", "spec.selector.matchLabels", true),
        FieldSpec::kind("DaemonSet", "spec.selector.matchLabels", true),
        FieldSpec::kind("StatefulSet", "spec.selector.matchLabels", true),
        FieldSpec::kind("Job", "spec.selector.matchLabels", false),
        FieldSpec::kind("NetworkPolicy", "spec.podSelector.matchLabels", false),
        FieldSpec::kind("Deployment", "spec.template.metadata.labels", true),
        FieldSpec::kind("ReplicaSet", "spec.template.metadata.labels", true),
        FieldSpec::kind("DaemonSet", "spec.template.metadata.labels", true),
        FieldSpec::kind("StatefulSet", "spec.template.metadata.labels", true),
        FieldSpec::kind("Job", "spec.template.metadata.labels", true),
        FieldSpec::kind("CronJob", "spec.jobTemplate.spec.template.metadata.labels", true),
        FieldSpec::kind("StatefulSet", "spec.volumeClaimTemplates[*].metadata.labels", true),
    ];

    config.common_annotations = vec![
        FieldSpec::any("metadata.annotations", true),
        FieldSpec::kind("Deployment", "spec.template.metadata.annotations", true),
        FieldSpec::kind("ReplicaSet", "spec.template.metadata.annotations", true),
        FieldSpec::kind("DaemonSet", "spec.template.metadata.annotations", true),
        FieldSpec::kind("StatefulSet", "spec.template.metadata.annotations", true),
        FieldSpec::kind("Job", "spec.template.metadata.annotations", true),
        FieldSpec::kind(
            "CronJob",
            "spec.jobTemplate.spec.template.metadata.annotations",
            true,
        ),
    ];

    config.namespace = vec![
        FieldSpec::any("metadata.namespace", true),
        FieldSpec::kind("RoleBinding", "subjects", false),
        FieldSpec::kind("ClusterRoleBinding", "subjects", false),
        FieldSpec::kind(
            "ValidatingWebhookConfiguration",
            "webhooks[*].clientConfig.service",
            false,
        ),
        FieldSpec::kind(
            "MutatingWebhookConfiguration",
            "webhooks[*].clientConfig.service",
            false,
        ),
    ];

    for prefix in POD_SPEC_PREFIXES {
        for list in CONTAINER_LISTS {
            config
                .images
                .push(FieldSpec::any(&format!("{prefix}.{list}[*].image"), false));
            for leaf in ["command", "args", "env[*].value"] {
                config.var_reference.push(FieldSpec::any(
                    &format!("{prefix}.{list}[*].{leaf}"),
                    false,
                ));
            }
        }
    }

    config.name_reference = vec![
        NameBackReferences {
            gvk: Gvk::new("", "v1", "ConfigMap"),
            field_specs: pod_spec_refs(&[
                "volumes[*].configMap.name",
                "volumes[*].projected.sources[*].configMap.name",
                "containers[*].env[*].valueFrom.configMapKeyRef.name",
                "initContainers[*].env[*].valueFrom.configMapKeyRef.name",
                "containers[*].envFrom[*].configMapRef.name",
                "initContainers[*].envFrom[*].configMapRef.name",
            ]),
        },
        NameBackReferences {
            gvk: Gvk::new("", "v1", "Secret"),
            field_specs: {
                let mut specs = pod_spec_refs(&[
                    "volumes[*].secret.secretName",
                    "volumes[*].projected.sources[*].secret.name",
                    "containers[*].env[*].valueFrom.secretKeyRef.name",
                    "initContainers[*].env[*].valueFrom.secretKeyRef.name",
                    "containers[*].envFrom[*].secretRef.name",
                    "initContainers[*].envFrom[*].secretRef.name",
                    "imagePullSecrets[*].name",
                ]);
                specs.push(FieldSpec::kind("Ingress", "spec.tls[*].secretName", false));
                specs
            },
        },
        NameBackReferences {
            gvk: Gvk::new("", "v1", "ServiceAccount"),
            field_specs: {
                let mut specs = pod_spec_refs(&["serviceAccountName"]);
                specs.push(FieldSpec::kind("RoleBinding", "subjects", false));
                specs.push(FieldSpec::kind("ClusterRoleBinding", "subjects", false));
                specs
            },
        },
        NameBackReferences {
            gvk: Gvk::new("", "v1", "Service"),
            field_specs: vec![
                FieldSpec::kind("StatefulSet", "spec.serviceName", false),
                FieldSpec::kind("Ingress", "spec.backend.serviceName", false),
                FieldSpec::kind(
                    "Ingress",
                    "spec.rules[*].http.paths[*].backend.serviceName",
                    false,
                ),
                FieldSpec::kind(
                    "ValidatingWebhookConfiguration",
                    "webhooks[*].clientConfig.service",
                    false,
                ),
                FieldSpec::kind(
                    "MutatingWebhookConfiguration",
                    "webhooks[*].clientConfig.service",
                    false,
                ),
                FieldSpec::kind("APIService", "spec.service", false),
            ],
        },
        NameBackReferences {
            gvk: Gvk::new("rbac.authorization.k8s.io", "", "Role"),
            field_specs: vec![FieldSpec::kind("RoleBinding", "roleRef.name", false)],
        },
        NameBackReferences {
            gvk: Gvk::new("rbac.authorization.k8s.io", "", "ClusterRole"),
            field_specs: vec![
                FieldSpec::kind("RoleBinding", "roleRef.name", false),
                FieldSpec::kind("ClusterRoleBinding", "roleRef.name", false),
            ],
        },
        NameBackReferences {
            gvk: Gvk::new("", "v1", "PersistentVolumeClaim"),
            field_specs: pod_spec_refs(&["volumes[*].persistentVolumeClaim.claimName"]),
        },
        NameBackReferences {
            gvk: Gvk::new("", "v1", "PersistentVolume"),
            field_specs: vec![FieldSpec::kind(
                "PersistentVolumeClaim",
                "spec.volumeName",
                false,
            )],
        },
    ];

    config
}

fn pod_spec_refs(suffixes: &[&str]) -> Vec<FieldSpec> {
    let mut specs = Vec::new();
    for prefix in POD_SPEC_PREFIXES {
        for suffix in suffixes {
            specs.push(FieldSpec::any(&format!("{prefix}.{suffix}"), false));
        }
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_paths_parse() {
        let config = default_config();
        for spec in config
            .name_prefix
            .iter()
            .chain(&config.common_labels)
            .chain(&config.common_annotations)
            .chain(&config.var_reference)
            .chain(&config.images)
            .chain(&config.namespace)
            .chain(config.name_reference.iter().flat_map(|b| &b.field_specs))
        {
            spec.segments().unwrap();
        }
    }

    #[test]
    fn user_configuration_file_merges_with_dedup() {
        let mut config = default_config().clone();
        let before = config.common_labels.len();
        let user = TransformerConfig::from_bytes(
            b"commonLabels:\n- path: metadata/labels\n  create: true\n- path: spec/extra/labels\n  kind: MyKind\n  create: true\n",
        )
        .unwrap();
        config.merge(user);
        // The metadata/labels path differs in separator only, but dedup is
        // syntactic: the genuinely new spec is appended, the dotted
        // shipped one stays.
        assert!(config.common_labels.len() >= before + 1);
        assert!(config
            .common_labels
            .iter()
            .any(|s| s.gvk.kind == "MyKind"));
    }

    #[test]
    fn name_reference_file_round_trips() {
        let parsed = TransformerConfig::from_bytes(
            b"nameReference:\n- kind: ConfigMap\n  version: v1\n  fieldSpecs:\n  - path: spec/configName\n    kind: MyApp\n",
        )
        .unwrap();
        assert_eq!(parsed.name_reference.len(), 1);
        assert_eq!(parsed.name_reference[0].gvk.kind, "ConfigMap");
        assert_eq!(
            parsed.name_reference[0].field_specs[0].gvk.kind,
            "MyApp"
        );
    }
}
