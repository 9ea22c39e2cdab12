//! Strategic merge patching.
//!
//! Each patch document selects its target by its own Gvk + name (+
//! namespace). Mappings merge recursively; a null value deletes the key;
//! lists whose field name carries a known merge key merge element-wise by
//! that key; all other lists are replaced, which is plain JSON-merge
//! semantics.

use crate::error::Error;
use crate::resid::ResId;
use crate::resmap::ResourceMap;
use crate::resource::Resource;
use crate::transform::Transformer;
use anyhow::{Context, Result};
use serde_yaml::Value;

/// The shipped merge-key table: list field name to the key that identifies
/// an element across target and patch.
const MERGE_KEYS: &[(&str, &str)] = &[
    ("containers", "name"),
    ("initContainers", "name"),
    ("volumes", "name"),
    ("env", "name"),
    ("ports", "containerPort"),
    ("volumeMounts", "mountPath"),
    ("imagePullSecrets", "name"),
    ("tolerations", "key"),
];

fn merge_key_for(field: &str) -> Option<&'static str> {
    MERGE_KEYS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, key)| *key)
}

#[derive(Debug)]
pub struct PatchStrategicMergeTransformer {
    patches: Vec<(ResId, serde_yaml::Mapping)>,
}

impl PatchStrategicMergeTransformer {
    /// Patches that select their target through their own Gvk + name.
    pub fn new(patches: Vec<Resource>) -> Self {
        PatchStrategicMergeTransformer {
            patches: patches
                .into_iter()
                .map(|p| (p.org_id().clone(), p.map().clone()))
                .collect(),
        }
    }

    /// Patches with an explicit target, as the generic `patches` list
    /// carries them; the patch body may then omit kind and name.
    pub fn targeted(target: ResId, bodies: Vec<serde_yaml::Mapping>) -> Self {
        PatchStrategicMergeTransformer {
            patches: bodies.into_iter().map(|b| (target.clone(), b)).collect(),
        }
    }
}

impl Transformer for PatchStrategicMergeTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        for (target_id, body) in &self.patches {
            let index = find_target(m, target_id)
                .with_context(|| format!("finding target of patch {target_id}"))?;
            let target = m.get_mut(index).expect("index was just found");
            let mut merged = Value::Mapping(target.map().clone());
            strategic_merge(&mut merged, &Value::Mapping(body.clone()), None);
            let Value::Mapping(result) = merged else {
                unreachable!("merging mappings yields a mapping");
            };
            *target.map_mut() = result;
            refresh_id(target)?;
        }
        Ok(())
    }
}

/// Locate a patch target: selection against original ids first (patches
/// are written against as-read names), falling back to current ids.
pub(crate) fn find_target(m: &ResourceMap, id: &ResId) -> Result<usize> {
    for id_of in [Resource::org_id, Resource::cur_id] {
        let matches: Vec<usize> = m
            .iter()
            .enumerate()
            .filter(|(_, r)| id.selects(id_of(r)))
            .map(|(i, _)| i)
            .collect();
        match matches.len() {
            0 => continue,
            1 => return Ok(matches[0]),
            n => return Err(Error::Ambiguous(format!("{n} matches for patch target {id}")).into()),
        }
    }
    Err(Error::NotFound(format!("no matches for patch target {id}")).into())
}

fn refresh_id(target: &mut Resource) -> Result<()> {
    // A patch may rename its target; re-derive the current id.
    let name = target
        .map()
        .get("metadata")
        .and_then(Value::as_mapping)
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let namespace = target
        .map()
        .get("metadata")
        .and_then(Value::as_mapping)
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if name != target.name() {
        target.record_prior_name();
        target.set_name(&name);
    }
    if namespace != target.namespace() {
        target.set_namespace(&namespace);
    }
    Ok(())
}

fn strategic_merge(target: &mut Value, patch: &Value, field: Option<&str>) {
    match patch {
        Value::Mapping(patch_map) => {
            let Value::Mapping(target_map) = target else {
                *target = patch.clone();
                return;
            };
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    target_map.remove(key);
                    continue;
                }
                match target_map.get_mut(key) {
                    Some(existing) => {
                        strategic_merge(existing, patch_value, key.as_str());
                    }
                    None => {
                        target_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        Value::Sequence(patch_list) => {
            let merge_key = field.and_then(merge_key_for);
            let (Some(merge_key), Value::Sequence(target_list)) = (merge_key, &mut *target)
            else {
                *target = patch.clone();
                return;
            };
            for patch_item in patch_list {
                let id = patch_item.get(merge_key);
                let existing = target_list
                    .iter_mut()
                    .find(|t| id.is_some() && t.get(merge_key) == id);
                match existing {
                    Some(item) => strategic_merge(item, patch_item, None),
                    None => target_list.push(patch_item.clone()),
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(yaml: &str) -> ResourceMap {
        let mut m = ResourceMap::new();
        for r in Resource::parse_all(yaml.as_bytes()).unwrap() {
            m.append(r).unwrap();
        }
        m
    }

    const DEPLOYMENT: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 1\n  template:\n    spec:\n      containers:\n      - name: app\n        image: nginx:1.7.9\n      - name: sidecar\n        image: envoy:v1\n";

    #[test]
    fn containers_merge_by_name() {
        let mut m = map_of(DEPLOYMENT);
        let patch = Resource::parse_all(
            b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 3\n  template:\n    spec:\n      containers:\n      - name: app\n        image: nginx:1.8.0\n",
        )
        .unwrap();
        PatchStrategicMergeTransformer::new(patch)
            .transform(&mut m)
            .unwrap();
        let spec = m.get(0).unwrap().map().get("spec").unwrap().clone();
        assert_eq!(spec.get("replicas").unwrap().as_i64(), Some(3));
        let containers = spec
            .get("template")
            .unwrap()
            .get("spec")
            .unwrap()
            .get("containers")
            .unwrap()
            .as_sequence()
            .unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].get("image").unwrap().as_str(), Some("nginx:1.8.0"));
        assert_eq!(containers[1].get("image").unwrap().as_str(), Some("envoy:v1"));
    }

    #[test]
    fn null_deletes_and_unknown_lists_replace() {
        let mut m = map_of(
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n  labels:\n    drop: me\nspec:\n  clusterIP: None\n  custom:\n  - a\n  - b\n",
        );
        let patch = Resource::parse_all(
            b"apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n  labels:\n    drop: null\nspec:\n  custom:\n  - c\n",
        )
        .unwrap();
        PatchStrategicMergeTransformer::new(patch)
            .transform(&mut m)
            .unwrap();
        let doc = m.get(0).unwrap().map();
        assert!(doc
            .get("metadata")
            .unwrap()
            .get("labels")
            .unwrap()
            .get("drop")
            .is_none());
        let custom = doc
            .get("spec")
            .unwrap()
            .get("custom")
            .unwrap()
            .as_sequence()
            .unwrap();
        assert_eq!(custom.len(), 1);
    }

    #[test]
    fn missing_target_is_an_error() {
        let mut m = map_of(DEPLOYMENT);
        let patch =
            Resource::parse_all(b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: ghost\n")
                .unwrap();
        let err = PatchStrategicMergeTransformer::new(patch)
            .transform(&mut m)
            .unwrap_err();
        assert!(format!("{err:#}").contains("no matches"));
    }
}
