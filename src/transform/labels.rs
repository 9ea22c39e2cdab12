//! Merge configured labels into every field-spec target.

use crate::error::Error;
use crate::resmap::ResourceMap;
use crate::transform::config::FieldSpec;
use crate::transform::{mutate_field, Transformer};
use anyhow::Result;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct LabelTransformer {
    labels: BTreeMap<String, String>,
    field_specs: Vec<FieldSpec>,
}

impl LabelTransformer {
    pub fn new(labels: BTreeMap<String, String>, field_specs: Vec<FieldSpec>) -> Self {
        LabelTransformer { labels, field_specs }
    }
}

impl Transformer for LabelTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        if self.labels.is_empty() {
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
                    &mut |value| merge_string_map(value, &self.labels),
                )?;
            }
        }
        Ok(())
    }
}

/// Insert every entry into the target mapping, overwriting existing keys.
/// A null target is replaced; anything else non-mapping is an error.
pub(crate) fn merge_string_map(
    value: &mut Value,
    entries: &BTreeMap<String, String>,
) -> Result<()> {
    if value.is_null() {
        *value = Value::Mapping(Mapping::new());
    }
    let Some(map) = value.as_mapping_mut() else {
        return Err(Error::MalformedInput(format!(
            "expected a mapping at a label/annotation path, got: {value:?}"
        ))
        .into());
    };
    for (k, v) in entries {
        map.insert(Value::from(k.as_str()), Value::from(v.as_str()));
    }
    Ok(())
}
