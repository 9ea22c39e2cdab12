//! Generate the inventory object: a ConfigMap whose annotations record
//! every produced resource id with its reference edges, plus a content
//! hash over the sorted id strings. Downstream prune tooling consumes it.

use crate::error::Error;
use crate::resmap::ResourceMap;
use crate::resource::Resource;
use crate::transform::hash::hash_sorted_strings;
use crate::transform::Transformer;
use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

pub const INVENTORY_ANNOTATION: &str = "kustomize.config.k8s.io/Inventory";
pub const INVENTORY_HASH_ANNOTATION: &str = "kustomize.config.k8s.io/InventoryHash";

pub const GARBAGE_POLICY_IGNORE: &str = "garbageIgnore";
pub const GARBAGE_POLICY_COLLECT: &str = "garbageCollect";

#[derive(Debug)]
pub struct InventoryTransformer {
    name: String,
    namespace: String,
    policy: String,
}

impl InventoryTransformer {
    pub fn new(name: &str, namespace: &str, policy: &str) -> Result<Self> {
        let policy = if policy.is_empty() {
            GARBAGE_POLICY_IGNORE
        } else {
            policy
        };
        if policy != GARBAGE_POLICY_IGNORE && policy != GARBAGE_POLICY_COLLECT {
            return Err(
                Error::MalformedInput(format!("unrecognized garbagePolicy {policy:?}")).into(),
            );
        }
        Ok(InventoryTransformer {
            name: name.to_string(),
            namespace: namespace.to_string(),
            policy: policy.to_string(),
        })
    }
}

impl Transformer for InventoryTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        let mut current: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for resource in m.iter() {
            let id = resource.cur_id().to_string();
            if current.contains_key(&id) {
                return Err(Error::Conflict(format!("item {id:?} already in inventory")).into());
            }
            let mut refs = Vec::new();
            for referrer in resource.ref_by() {
                let referrer = m
                    .get_by_current_id(referrer)
                    .with_context(|| format!("resolving back reference of {id}"))?;
                refs.push(referrer.cur_id().to_string());
            }
            current.insert(id, refs);
        }
        let keys: Vec<String> = current.keys().cloned().collect();
        let hash = hash_sorted_strings(&keys)?;
        let inventory_json = serde_json::to_string(&serde_json::json!({ "current": current }))
            .context("encoding inventory annotation")?;

        let mut annotations = Mapping::new();
        annotations.insert(Value::from(INVENTORY_ANNOTATION), Value::from(inventory_json));
        annotations.insert(Value::from(INVENTORY_HASH_ANNOTATION), Value::from(hash));

        let mut metadata = Mapping::new();
        metadata.insert(Value::from("name"), Value::from(self.name.as_str()));
        if !self.namespace.is_empty() {
            metadata.insert(Value::from("namespace"), Value::from(self.namespace.as_str()));
        }
        metadata.insert(Value::from("annotations"), Value::Mapping(annotations));

        let mut doc = Mapping::new();
        doc.insert(Value::from("apiVersion"), Value::from("v1"));
        doc.insert(Value::from("kind"), Value::from("ConfigMap"));
        doc.insert(Value::from("metadata"), Value::Mapping(metadata));

        if self.policy == GARBAGE_POLICY_COLLECT {
            for id in m.all_ids() {
                m.remove(&id);
            }
        }
        m.append(Resource::from_mapping(doc)?)
            .context("appending inventory object")
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

    #[test]
    fn inventory_records_ids_and_hash() {
        let mut m = map_of(
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n",
        );
        InventoryTransformer::new("inv", "default", "")
            .unwrap()
            .transform(&mut m)
            .unwrap();
        assert_eq!(m.len(), 3);
        let inv = m.get(2).unwrap();
        assert_eq!(inv.name(), "inv");
        let annotations = inv
            .map()
            .get("metadata")
            .unwrap()
            .get("annotations")
            .unwrap()
            .clone();
        let recorded = annotations.get(INVENTORY_ANNOTATION).unwrap().as_str().unwrap();
        assert!(recorded.contains("~G_v1_Service|~X|svc"));
        assert_eq!(
            annotations.get(INVENTORY_HASH_ANNOTATION).unwrap().as_str().unwrap().len(),
            10
        );
    }

    #[test]
    fn garbage_collect_empties_the_rest() {
        let mut m = map_of("apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n");
        InventoryTransformer::new("inv", "", GARBAGE_POLICY_COLLECT)
            .unwrap()
            .transform(&mut m)
            .unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(0).unwrap().name(), "inv");
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(InventoryTransformer::new("inv", "", "garbageDump").is_err());
    }
}
