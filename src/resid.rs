//! # ResId
//!
//! The identity of a manifest: Gvk plus name plus namespace. This is the
//! primary key of the resource map. An untransformed resource has whatever
//! namespace it was read with (possibly none); a fully transformed resource
//! has the namespace of the topmost overlay.

use crate::gvk::Gvk;
use serde::{Deserialize, Serialize};
use std::fmt;

const NO_NAMESPACE: &str = "~X";
const NO_NAME: &str = "~N";
const SEPARATOR: &str = "|";

/// Reported as the effective namespace of kinds that cannot be in one.
pub const TOTALLY_NOT_A_NAMESPACE: &str = "_non_namespaceable_";

/// The namespace a namespaceable resource lands in when none is set.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Identifier of a Kubernetes resource object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResId {
    #[serde(flatten)]
    pub gvk: Gvk,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl ResId {
    pub fn new(gvk: Gvk, name: &str) -> Self {
        ResId {
            gvk,
            name: name.to_string(),
            namespace: String::new(),
        }
    }

    pub fn with_namespace(gvk: Gvk, name: &str, namespace: &str) -> Self {
        ResId {
            gvk,
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    pub fn from_kind_and_name(kind: &str, name: &str) -> Self {
        ResId::new(Gvk::from_kind(kind), name)
    }

    /// True if the other id matches group/version/kind/name.
    pub fn gvkn_equals(&self, other: &ResId) -> bool {
        self.name == other.name && self.gvk.equals(&other.gvk)
    }

    /// True if the other id matches namespace/group/version/kind/name,
    /// where namespaces are compared in effective form.
    pub fn equals(&self, other: &ResId) -> bool {
        self.is_ns_equals(other) && self.gvkn_equals(other)
    }

    /// True if both ids are in the same effective namespace.
    pub fn is_ns_equals(&self, other: &ResId) -> bool {
        self.effective_namespace() == other.effective_namespace()
    }

    fn is_putatively_default_ns(&self) -> bool {
        self.namespace.is_empty() || self.namespace == DEFAULT_NAMESPACE
    }

    /// A non-ambiguous, non-empty namespace for equality tests and
    /// reporting.
    pub fn effective_namespace(&self) -> String {
        // The order of these checks matters.
        if !self.gvk.is_namespaceable() {
            return TOTALLY_NOT_A_NAMESPACE.to_string();
        }
        if self.is_putatively_default_ns() {
            return DEFAULT_NAMESPACE.to_string();
        }
        self.namespace.clone()
    }

    /// Selection semantics: Gvk selection, exact name match, and an empty
    /// selector namespace matches any target namespace.
    pub fn selects(&self, target: &ResId) -> bool {
        if !target.gvk.is_selected(&self.gvk) {
            return false;
        }
        if self.name != target.name {
            return false;
        }
        if self.namespace.is_empty() {
            return true;
        }
        self.namespace == target.namespace
            || self.namespace == target.effective_namespace()
    }

    /// Gvk and name only, `G_V_K|name`.
    pub fn gvkn_string(&self) -> String {
        format!("{}{}{}", self.gvk, SEPARATOR, self.name)
    }
}

impl fmt::Display for ResId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = if self.namespace.is_empty() { NO_NAMESPACE } else { &self.namespace };
        let nm = if self.name.is_empty() { NO_NAME } else { &self.name };
        write!(f, "{}{SEPARATOR}{ns}{SEPARATOR}{nm}", self.gvk)
    }
}
