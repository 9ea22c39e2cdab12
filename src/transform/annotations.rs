//! Merge configured annotations into every field-spec target.

use crate::resmap::ResourceMap;
use crate::transform::config::FieldSpec;
use crate::transform::labels::merge_string_map;
use crate::transform::{mutate_field, Transformer};
use anyhow::Result;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct AnnotationsTransformer {
    annotations: BTreeMap<String, String>,
    field_specs: Vec<FieldSpec>,
}

impl AnnotationsTransformer {
    pub fn new(annotations: BTreeMap<String, String>, field_specs: Vec<FieldSpec>) -> Self {
        AnnotationsTransformer {
            annotations,
            field_specs,
        }
    }
}

impl Transformer for AnnotationsTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        if self.annotations.is_empty() {
            return Ok(());
        }
        for resource in m.iter_mut() {
            let id = resource.org_id().clone();
            for spec in &self.field_specs {
                if !spec.applies_to(&id) {
                    continue;
                }
                let segments = spec.segments()?;
                mutate_field(
                    resource.map_mut(),
                    &segments,
                    spec.create_if_not_present,
                    &mut |value| merge_string_map(value, &self.annotations),
                )?;
            }
        }
        Ok(())
    }
}
