//! Set the namespace of every namespaceable resource, and rewrite the
//! embedded namespace references the shipped field specs point at.
//!
//! Subject lists of role bindings get their namespace forced only when the
//! subject name is `default`: the implicit default ServiceAccount is the
//! one referent that is never declared in the input tree. This is a
//! compatibility artifact carried over from the lineage.

use crate::error::Error;
use crate::resmap::ResourceMap;
use crate::transform::config::FieldSpec;
use crate::transform::{mutate_field, PathSegment, Transformer};
use anyhow::Result;
use serde_yaml::Value;

#[derive(Debug)]
pub struct NamespaceTransformer {
    namespace: String,
    field_specs: Vec<FieldSpec>,
}

impl NamespaceTransformer {
    pub fn new(namespace: &str, field_specs: Vec<FieldSpec>) -> Self {
        NamespaceTransformer {
            namespace: namespace.to_string(),
            field_specs,
        }
    }

    fn change_namespace(&self, value: &mut Value) -> Result<()> {
        match value {
            Value::String(_) => {
                *value = Value::from(self.namespace.as_str());
            }
            Value::Sequence(items) => {
                // Subject lists of RoleBinding and ClusterRoleBinding.
                for item in items.iter_mut() {
                    let Some(map) = item.as_mapping_mut() else {
                        continue;
                    };
                    let is_default = map
                        .get("name")
                        .and_then(Value::as_str)
                        .map(|n| n == "default")
                        .unwrap_or(false);
                    if is_default {
                        map.insert(
                            Value::from("namespace"),
                            Value::from(self.namespace.as_str()),
                        );
                    }
                }
            }
            Value::Mapping(map) => {
                // Only a mapping freshly created by create-if-not-present
                // is replaced; populated reference maps are left for the
                // name-reference transformer to resolve.
                if map.is_empty() {
                    *value = Value::from(self.namespace.as_str());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn is_metadata_namespace(segments: &[PathSegment]) -> bool {
    segments
        == [
            PathSegment::Field("metadata".to_string()),
            PathSegment::Field("namespace".to_string()),
        ]
}

impl Transformer for NamespaceTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        if self.namespace.is_empty() {
            return Ok(());
        }
        for resource in m.iter_mut() {
            if resource.map().is_empty() {
                continue;
            }
            let id = resource.org_id().clone();
            for spec in &self.field_specs {
                if !spec.applies_to(&id) {
                    continue;
                }
                let segments = spec.segments()?;
                if is_metadata_namespace(&segments) {
                    if resource.gvk().is_namespaceable() {
                        resource.set_namespace(&self.namespace);
                    }
                } else {
                    mutate_field(
                        resource.map_mut(),
                        &segments,
                        spec.create_if_not_present,
                        &mut |value| self.change_namespace(value),
                    )?;
                }
            }
        }
        for resource in m.iter() {
            let matches = m.get_matching_resources_by_current_id(|id| resource.cur_id().equals(id));
            if matches.len() != 1 {
                return Err(Error::Conflict(format!(
                    "namespace transformation produces ID conflict: {}",
                    resource.cur_id()
                ))
                .into());
            }
        }
        Ok(())
    }
}
