//! Find matching image declarations and replace the name, tag and/or
//! digest.
//!
//! Two passes run per resource: the field-spec driven one, and a legacy
//! walk that hunts for `containers`/`initContainers` arrays anywhere in
//! the tree. The walk is redundant where field specs cover the same paths
//! and is retained for compatibility; it skips CustomResourceDefinitions.

use crate::error::Error;
use crate::resmap::ResourceMap;
use crate::transform::config::FieldSpec;
use crate::transform::{mutate_field, Transformer};
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// One image substitution rule from the descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub new_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub new_tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

#[derive(Debug)]
pub struct ImageTagTransformer {
    image: Image,
    field_specs: Vec<FieldSpec>,
    matcher: Regex,
}

impl ImageTagTransformer {
    pub fn new(image: Image, field_specs: Vec<FieldSpec>) -> Result<Self> {
        // Tag values are limited to [a-zA-Z0-9_.-].
        let pattern = format!("^{}(@sha256)?(:[a-zA-Z0-9_.-]*)?$", image.name);
        let matcher = Regex::new(&pattern)
            .map_err(|e| Error::MalformedInput(format!("image name {:?}: {e}", image.name)))?;
        Ok(ImageTagTransformer {
            image,
            field_specs,
            matcher,
        })
    }

    fn mutate_image(&self, original: &str) -> String {
        if !self.matcher.is_match(original) {
            return original.to_string();
        }
        let (mut name, mut tag) = split_name_and_tag(original);
        if !self.image.new_name.is_empty() {
            name = self.image.new_name.clone();
        }
        if !self.image.new_tag.is_empty() {
            tag = format!(":{}", self.image.new_tag);
        }
        if !self.image.digest.is_empty() {
            tag = format!("@{}", self.image.digest);
        }
        format!("{name}{tag}")
    }

    fn update_containers(&self, containers: &mut Value) -> Result<()> {
        let Some(list) = containers.as_sequence_mut() else {
            return Err(Error::MalformedInput(format!(
                "containers path is not a sequence but {containers:?}"
            ))
            .into());
        };
        for container in list.iter_mut() {
            let Some(map) = container.as_mapping_mut() else {
                continue;
            };
            let Some(image) = map.get("image").and_then(Value::as_str) else {
                continue;
            };
            let replaced = self.mutate_image(image);
            map.insert(Value::from("image"), Value::from(replaced));
        }
        Ok(())
    }

    fn find_and_replace_image(&self, obj: &mut Mapping) -> Result<()> {
        let mut updated = false;
        for path in ["containers", "initContainers"] {
            if let Some(containers) = obj.get_mut(path) {
                self.update_containers(containers)?;
                updated = true;
            }
        }
        if !updated {
            self.find_containers(obj)?;
        }
        Ok(())
    }

    fn find_containers(&self, obj: &mut Mapping) -> Result<()> {
        for (_, value) in obj.iter_mut() {
            match value {
                Value::Mapping(inner) => self.find_and_replace_image(inner)?,
                Value::Sequence(items) => {
                    for item in items.iter_mut() {
                        if let Value::Mapping(inner) = item {
                            self.find_and_replace_image(inner)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Transformer for ImageTagTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        for resource in m.iter_mut() {
            let id = resource.org_id().clone();
            for spec in &self.field_specs {
                if !spec.applies_to(&id) {
                    continue;
                }
                let segments = spec.segments()?;
                mutate_field(resource.map_mut(), &segments, false, &mut |value| {
                    let Some(original) = value.as_str() else {
                        return Err(Error::MalformedInput(format!(
                            "image path is not a string but {value:?}"
                        ))
                        .into());
                    };
                    *value = Value::from(self.mutate_image(original));
                    Ok(())
                })?;
            }
            // Kept for backward compatibility.
            let walk = self.find_and_replace_image(resource.map_mut());
            if walk.is_err() && id.gvk.kind != "CustomResourceDefinition" {
                return walk;
            }
        }
        Ok(())
    }
}

/// Separate the name and tag parts of an image string, on either `:` or
/// `@`. The returned tag keeps its separator. A `:` before the first `/`
/// is a registry port, not a tag separator.
fn split_name_and_tag(image: &str) -> (String, String) {
    let colon = match image.find('/') {
        None => image.rfind(':'),
        Some(slash) => image[slash..].rfind(':').map(|i| slash + i),
    };
    let at = image.rfind('@');
    let cut = match (colon, at) {
        (_, Some(a)) => Some(a),
        (Some(c), None) => Some(c),
        (None, None) => None,
    };
    match cut {
        Some(i) => (image[..i].to_string(), image[i..].to_string()),
        None => (image.to_string(), String::new()),
    }
}
