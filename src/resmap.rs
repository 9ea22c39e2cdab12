//! # ResourceMap
//!
//! The ordered collection of resources an in-flight build operates on.
//! Insertion order is preserved through every operation except the legacy
//! order transformer; id lookups scan the list, which stays small.

use crate::error::Error;
use crate::resid::ResId;
use crate::resource::{GenerationBehavior, Resource};
use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};

/// Ordered set of resources keyed by current id.
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    resources: Vec<Resource>,
}

impl ResourceMap {
    pub fn new() -> Self {
        ResourceMap::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Resource> {
        self.resources.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Resource> {
        self.resources.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Resource> {
        self.resources.get_mut(index)
    }

    /// All current ids, in insertion order.
    pub fn all_ids(&self) -> Vec<ResId> {
        self.resources.iter().map(|r| r.cur_id().clone()).collect()
    }

    /// Replace the whole contents, preserving nothing. Used by the legacy
    /// order transformer, which re-appends in sorted order.
    pub fn replace_all(&mut self, resources: Vec<Resource>) {
        self.resources = resources;
    }

    pub fn take_all(&mut self) -> Vec<Resource> {
        std::mem::take(&mut self.resources)
    }

    /// Append a resource. A duplicate current id fails unless the incoming
    /// resource carries `replace` (overwrite in place, keeping position and
    /// merging reference metadata) or `merge` (deep-merge `data` /
    /// `binaryData` for ConfigMap/Secret, keeping the original's generator
    /// options).
    pub fn append(&mut self, resource: Resource) -> Result<()> {
        let existing = self
            .resources
            .iter()
            .position(|r| r.cur_id().equals(resource.cur_id()));
        let Some(index) = existing else {
            self.resources.push(resource);
            return Ok(());
        };
        match resource.behavior() {
            GenerationBehavior::Create => Err(Error::Conflict(format!(
                "may not add resource with an already registered id: {}",
                resource.cur_id()
            ))
            .into()),
            GenerationBehavior::Replace => {
                let mut incoming = resource;
                incoming.merge_ref_metadata(&self.resources[index]);
                self.resources[index] = incoming;
                Ok(())
            }
            GenerationBehavior::Merge => {
                let target = &mut self.resources[index];
                merge_generated_data(target, &resource).with_context(|| {
                    format!("merging generated resource {}", resource.cur_id())
                })
            }
        }
    }

    /// Remove the resource with the given current id. Idempotent.
    pub fn remove(&mut self, id: &ResId) {
        self.resources.retain(|r| !r.cur_id().equals(id));
    }

    /// Exact match on current id.
    pub fn get_by_id(&self, id: &ResId) -> Result<&Resource> {
        self.resources
            .iter()
            .find(|r| r.cur_id().equals(id))
            .ok_or_else(|| Error::NotFound(format!("no resource with id {id}")).into())
    }

    pub fn get_by_id_mut(&mut self, id: &ResId) -> Result<&mut Resource> {
        self.resources
            .iter_mut()
            .find(|r| r.cur_id().equals(id))
            .ok_or_else(|| Error::NotFound(format!("no resource with id {id}")).into())
    }

    /// Selection-matched lookup against current ids. Fails when no
    /// resource matches, or when more than one does.
    pub fn get_by_current_id(&self, id: &ResId) -> Result<&Resource> {
        self.unique_match(id, |r| id.selects(r.cur_id()))
    }

    /// Selection-matched lookup against original (as-read) ids.
    pub fn get_by_original_id(&self, id: &ResId) -> Result<&Resource> {
        self.unique_match(id, |r| id.selects(r.org_id()))
    }

    fn unique_match<'a>(
        &'a self,
        id: &ResId,
        pred: impl Fn(&Resource) -> bool,
    ) -> Result<&'a Resource> {
        let matches: Vec<&Resource> = self.resources.iter().filter(|r| pred(r)).collect();
        match matches.len() {
            0 => Err(Error::NotFound(format!("no matches for id {id}")).into()),
            1 => Ok(matches[0]),
            n => Err(Error::Ambiguous(format!("{n} matches for id {id}")).into()),
        }
    }

    /// All resources whose current id satisfies the predicate, without an
    /// ambiguity failure. Used by transformers that must check for
    /// post-mutation conflicts.
    pub fn get_matching_resources_by_current_id(
        &self,
        pred: impl Fn(&ResId) -> bool,
    ) -> Vec<&Resource> {
        self.resources.iter().filter(|r| pred(r.cur_id())).collect()
    }

    /// Move every resource of `other` into this map, honoring merge and
    /// replace behavior. Cross-map id conflicts are fatal.
    pub fn absorb_all(&mut self, other: ResourceMap) -> Result<()> {
        for resource in other.resources {
            let id = resource.cur_id().clone();
            self.append(resource)
                .with_context(|| format!("absorbing resource {id}"))?;
        }
        Ok(())
    }

    /// Serialize the map in current order: `---`-separated documents,
    /// mapping keys in canonical (sorted) order, LF endings. Byte-stable
    /// across identical inputs.
    pub fn as_yaml(&self) -> Result<String> {
        let mut docs = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            let canonical = canonicalize(&Value::Mapping(resource.map().clone()));
            let doc = serde_yaml::to_string(&canonical)
                .with_context(|| format!("serializing {}", resource.cur_id()))?;
            docs.push(doc);
        }
        Ok(docs.join("---\n"))
    }
}

/// Recursively sort mapping keys so emission is independent of the order
/// transformations touched them in.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Mapping(m) => {
            let mut entries: Vec<(String, Value)> = m
                .iter()
                .map(|(k, v)| (key_string(k), canonicalize(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Mapping::new();
            for (k, v) in entries {
                sorted.insert(Value::from(k), v);
            }
            Value::Mapping(sorted)
        }
        Value::Sequence(s) => Value::Sequence(s.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn key_string(key: &Value) -> String {
    match key.as_str() {
        Some(s) => s.to_string(),
        None => serde_yaml::to_string(key)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

fn merge_generated_data(target: &mut Resource, incoming: &Resource) -> Result<()> {
    let kind = &target.cur_id().gvk.kind;
    if kind != "ConfigMap" && kind != "Secret" {
        return Err(Error::Conflict(format!(
            "merge behavior is only supported for ConfigMap and Secret, not {kind}"
        ))
        .into());
    }
    for field in ["data", "binaryData"] {
        let Some(Value::Mapping(incoming_data)) = incoming.map().get(field) else {
            continue;
        };
        let incoming_data = incoming_data.clone();
        let target_map = target.map_mut();
        if !target_map.contains_key(field) {
            target_map.insert(Value::from(field), Value::Mapping(Mapping::new()));
        }
        let Some(Value::Mapping(existing)) = target_map.get_mut(field) else {
            return Err(Error::MalformedInput(format!("{field} is not a mapping")).into());
        };
        for (k, v) in incoming_data {
            existing.insert(k, v);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gvk::Gvk;

    fn res(yaml: &str) -> Resource {
        Resource::parse_all(yaml.as_bytes())
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn append_rejects_duplicate_ids() {
        let mut m = ResourceMap::new();
        m.append(res("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n"))
            .unwrap();
        let err = m
            .append(res("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n"))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn same_name_different_namespace_coexist() {
        let mut m = ResourceMap::new();
        m.append(res(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: dummy\n  namespace: default\n",
        ))
        .unwrap();
        m.append(res(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: dummy\n  namespace: kube-system\n",
        ))
        .unwrap();
        assert_eq!(m.len(), 2);

        // A namespace-less lookup sees both and cannot disambiguate.
        let id = ResId::new(Gvk::new("", "v1", "Secret"), "dummy");
        let err = m.get_by_current_id(&id).unwrap_err();
        assert!(err.to_string().contains("unable to disambiguate"));
    }

    #[test]
    fn merge_behavior_merges_data() {
        let mut m = ResourceMap::new();
        m.append(res(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: s\ndata:\n  a: MQ==\n",
        ))
        .unwrap();
        let mut update = res(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: s\ndata:\n  b: Mg==\n",
        );
        update.set_behavior(GenerationBehavior::Merge);
        m.append(update).unwrap();
        assert_eq!(m.len(), 1);
        let data = m.get(0).unwrap().map().get("data").unwrap();
        assert!(data.get("a").is_some());
        assert!(data.get("b").is_some());
    }

    #[test]
    fn replace_behavior_keeps_position() {
        let mut m = ResourceMap::new();
        m.append(res("kind: ConfigMap\nmetadata:\n  name: first\n")).unwrap();
        m.append(res("kind: ConfigMap\nmetadata:\n  name: second\n")).unwrap();
        let mut replacement =
            res("kind: ConfigMap\nmetadata:\n  name: first\ndata:\n  k: v\n");
        replacement.set_behavior(GenerationBehavior::Replace);
        m.append(replacement).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(0).unwrap().name(), "first");
        assert!(m.get(0).unwrap().map().get("data").is_some());
    }

    #[test]
    fn as_yaml_sorts_keys_and_separates_documents() {
        let mut m = ResourceMap::new();
        m.append(res(
            "kind: ConfigMap\napiVersion: v1\nmetadata:\n  namespace: ns\n  name: cm\n",
        ))
        .unwrap();
        m.append(res("kind: Secret\napiVersion: v1\nmetadata:\n  name: s\n"))
            .unwrap();
        let yaml = m.as_yaml().unwrap();
        assert_eq!(
            yaml,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n  namespace: ns\n---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: s\n"
        );
    }

    #[test]
    fn remove_is_idempotent() {
        let mut m = ResourceMap::new();
        m.append(res("kind: ConfigMap\nmetadata:\n  name: cm\n")).unwrap();
        let id = m.get(0).unwrap().cur_id().clone();
        m.remove(&id);
        m.remove(&id);
        assert!(m.is_empty());
    }
}
