//! Concatenate a configured prefix and suffix around resource names.
//!
//! Kinds that own their identity at cluster-config level (Namespace,
//! CustomResourceDefinition, APIService) are left alone. The pre-rename
//! name is recorded in the resource's name history so reference rewriting
//! can still find it.

use crate::error::Error;
use crate::resmap::ResourceMap;
use crate::transform::config::FieldSpec;
use crate::transform::{mutate_field, PathSegment, Transformer};
use anyhow::Result;
use serde_yaml::Value;

const SKIPPED_KINDS: &[&str] = &["CustomResourceDefinition", "Namespace", "APIService"];

#[derive(Debug)]
pub struct PrefixSuffixTransformer {
    prefix: String,
    suffix: String,
    field_specs: Vec<FieldSpec>,
}

impl PrefixSuffixTransformer {
    pub fn new(prefix: &str, suffix: &str, field_specs: Vec<FieldSpec>) -> Self {
        PrefixSuffixTransformer {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            field_specs,
        }
    }

    fn decorate(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, name, self.suffix)
    }
}

fn is_metadata_name(segments: &[PathSegment]) -> bool {
    segments
        == [
            PathSegment::Field("metadata".to_string()),
            PathSegment::Field("name".to_string()),
        ]
}

impl Transformer for PrefixSuffixTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        if self.prefix.is_empty() && self.suffix.is_empty() {
            return Ok(());
        }
        for resource in m.iter_mut() {
            if SKIPPED_KINDS.contains(&resource.gvk().kind.as_str()) {
                continue;
            }
            let id = resource.org_id().clone();
            for spec in &self.field_specs {
                if !spec.applies_to(&id) {
                    continue;
                }
                let segments = spec.segments()?;
                if is_metadata_name(&segments) {
                    let renamed = self.decorate(resource.name());
                    resource.record_prior_name();
                    resource.set_name(&renamed);
                } else {
                    mutate_field(
                        resource.map_mut(),
                        &segments,
                        spec.create_if_not_present,
                        &mut |value| {
                            let Some(old) = value.as_str() else {
                                return Err(Error::MalformedInput(format!(
                                    "prefix/suffix path must end at a string, got: {value:?}"
                                ))
                                .into());
                            };
                            *value = Value::from(self.decorate(old));
                            Ok(())
                        },
                    )?;
                }
            }
        }
        Ok(())
    }
}
