//! # Gvk
//!
//! Group/version/kind identification of a manifest schema, with the two
//! equality flavors the composer relies on: strict equality and selection
//! (empty selector fields match anything). Also home of the kind ordering
//! used by the legacy emitter and of cluster-scope knowledge.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

const NO_GROUP: &str = "~G";
const NO_VERSION: &str = "~V";
const NO_KIND: &str = "~K";
const FIELD_SEPARATOR: &str = "_";

/// Kinds emitted first, in this order: cluster-scope foundations before
/// the workloads that depend on them.
const ORDER_FIRST: &[&str] = &[
    "Namespace",
    "ResourceQuota",
    "StorageClass",
    "CustomResourceDefinition",
    "MutatingWebhookConfiguration",
    "ServiceAccount",
    "PodSecurityPolicy",
    "Role",
    "ClusterRole",
    "RoleBinding",
    "ClusterRoleBinding",
    "ConfigMap",
    "Secret",
    "Service",
    "LimitRange",
    "PriorityClass",
    "Deployment",
    "StatefulSet",
    "CronJob",
    "PodDisruptionBudget",
];

/// Kinds emitted last.
const ORDER_LAST: &[&str] = &["ValidatingWebhookConfiguration"];

/// Kinds that do not live in a namespace.
const NOT_NAMESPACEABLE: &[&str] = &[
    "APIService",
    "CSIDriver",
    "CSINode",
    "CertificateSigningRequest",
    "ClusterRole",
    "ClusterRoleBinding",
    "ComponentStatus",
    "CustomResourceDefinition",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PodSecurityPolicy",
    "PriorityClass",
    "RuntimeClass",
    "SelfSubjectAccessReview",
    "SelfSubjectRulesReview",
    "StorageClass",
    "SubjectAccessReview",
    "TokenReview",
    "ValidatingWebhookConfiguration",
    "VolumeAttachment",
];

/// A group/version/kind triple. Any field may be empty; an empty field in
/// a selector matches any value on the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gvk {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl Gvk {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Gvk {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    pub fn from_kind(kind: &str) -> Self {
        Gvk {
            group: String::new(),
            version: String::new(),
            kind: kind.to_string(),
        }
    }

    /// Split an `apiVersion` value (`v1` or `group/version`) plus a kind.
    pub fn from_api_version_and_kind(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Gvk::new(group, version, kind),
            None => Gvk::new("", api_version, kind),
        }
    }

    /// The `apiVersion` field value for this Gvk, if any.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty() && self.version.is_empty() && self.kind.is_empty()
    }

    /// Strict equality on all three fields.
    pub fn equals(&self, other: &Gvk) -> bool {
        self == other
    }

    /// Selection equality: an empty field on the selector matches any
    /// value on `self`.
    pub fn is_selected(&self, selector: &Gvk) -> bool {
        if !selector.group.is_empty() && self.group != selector.group {
            return false;
        }
        if !selector.version.is_empty() && self.version != selector.version {
            return false;
        }
        if !selector.kind.is_empty() && self.kind != selector.kind {
            return false;
        }
        true
    }

    /// Whether instances of this kind live in a namespace.
    pub fn is_namespaceable(&self) -> bool {
        !NOT_NAMESPACEABLE.contains(&self.kind.as_str())
    }

    /// Whether this kind participates in cluster scope rather than a
    /// namespace.
    pub fn is_cluster_scoped(&self) -> bool {
        !self.is_namespaceable()
    }

    /// Position of this kind in the legacy emit order. Kinds absent from
    /// both lists sort between the two.
    pub fn order_index(&self) -> usize {
        if let Some(i) = ORDER_FIRST.iter().position(|k| *k == self.kind) {
            return i;
        }
        if let Some(i) = ORDER_LAST.iter().position(|k| *k == self.kind) {
            return ORDER_FIRST.len() + 1 + i;
        }
        ORDER_FIRST.len()
    }

    /// Total order for the legacy emitter: order index first, then the
    /// string form as tie breaker.
    pub fn legacy_cmp(&self, other: &Gvk) -> Ordering {
        self.order_index()
            .cmp(&other.order_index())
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = if self.group.is_empty() { NO_GROUP } else { &self.group };
        let v = if self.version.is_empty() { NO_VERSION } else { &self.version };
        let k = if self.kind.is_empty() { NO_KIND } else { &self.kind };
        write!(f, "{g}{FIELD_SEPARATOR}{v}{FIELD_SEPARATOR}{k}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_form_uses_sentinels() {
        assert_eq!(Gvk::from_kind("Deployment").to_string(), "~G_~V_Deployment");
        assert_eq!(
            Gvk::new("apps", "v1", "Deployment").to_string(),
            "apps_v1_Deployment"
        );
    }

    #[test]
    fn selection_ignores_empty_selector_fields() {
        let target = Gvk::new("apps", "v1", "Deployment");
        assert!(target.is_selected(&Gvk::default()));
        assert!(target.is_selected(&Gvk::from_kind("Deployment")));
        assert!(!target.is_selected(&Gvk::from_kind("Service")));
        assert!(!target.is_selected(&Gvk::new("batch", "", "Deployment")));
    }

    #[test]
    fn api_version_round_trip() {
        let gvk = Gvk::from_api_version_and_kind("rbac.authorization.k8s.io/v1", "Role");
        assert_eq!(gvk.group, "rbac.authorization.k8s.io");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "rbac.authorization.k8s.io/v1");

        let core = Gvk::from_api_version_and_kind("v1", "Service");
        assert_eq!(core.group, "");
        assert_eq!(core.api_version(), "v1");
    }

    #[test]
    fn namespace_kinds() {
        assert!(Gvk::from_kind("Deployment").is_namespaceable());
        assert!(Gvk::from_kind("Secret").is_namespaceable());
        assert!(!Gvk::from_kind("Namespace").is_namespaceable());
        assert!(!Gvk::from_kind("ClusterRole").is_namespaceable());
        assert!(!Gvk::from_kind("PersistentVolume").is_namespaceable());
    }

    #[test]
    fn legacy_order_puts_foundations_first_and_webhooks_last() {
        let mut kinds = vec![
            "Service",
            "Role",
            "ValidatingWebhookConfiguration",
            "LimitRange",
            "Deployment",
            "Namespace",
            "Secret",
            "Ingress",
            "ConfigMap",
        ];
        kinds.sort_by(|a, b| Gvk::from_kind(a).legacy_cmp(&Gvk::from_kind(b)));
        assert_eq!(
            kinds,
            vec![
                "Namespace",
                "Role",
                "ConfigMap",
                "Secret",
                "Service",
                "LimitRange",
                "Deployment",
                "Ingress",
                "ValidatingWebhookConfiguration",
            ]
        );
    }

    #[test]
    fn legacy_order_is_idempotent() {
        let mut a = vec!["Ingress", "Namespace", "Pod", "Secret"];
        let mut b = a.clone();
        a.sort_by(|x, y| Gvk::from_kind(x).legacy_cmp(&Gvk::from_kind(y)));
        b.sort_by(|x, y| Gvk::from_kind(x).legacy_cmp(&Gvk::from_kind(y)));
        b.sort_by(|x, y| Gvk::from_kind(x).legacy_cmp(&Gvk::from_kind(y)));
        assert_eq!(a, b);
    }
}
