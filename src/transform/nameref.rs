//! Rewrite references to renamed resources.
//!
//! For every referrer field the configuration declares, each leaf naming a
//! resource is looked up in the map by its original name or any entry of
//! its name history; a unique match replaces the leaf with the referent's
//! current name, and the edge is recorded on the referent. Leaves come in
//! three shapes: a plain string, a list of strings, and (for binding
//! subjects and webhook service refs) mappings carrying `name` plus
//! `namespace`, where both fields follow the referent.

use crate::error::Error;
use crate::gvk::Gvk;
use crate::resid::ResId;
use crate::resmap::ResourceMap;
use crate::transform::config::NameBackReferences;
use crate::transform::{mutate_field, Transformer};
use anyhow::{Context, Result};
use serde_yaml::Value;

#[derive(Debug)]
pub struct NameReferenceTransformer {
    backrefs: Vec<NameBackReferences>,
}

impl NameReferenceTransformer {
    pub fn new(backrefs: Vec<NameBackReferences>) -> Self {
        NameReferenceTransformer { backrefs }
    }
}

/// A snapshot of one potential referent, detached from the map so leaves
/// can be rewritten while it is consulted.
#[derive(Debug, Clone)]
struct Candidate {
    index: usize,
    gvk: Gvk,
    cur_name: String,
    cur_namespace: String,
    org_namespace: String,
    effective_namespace: String,
    cluster_scoped: bool,
    known_names: Vec<String>,
}

impl Candidate {
    fn was_named(&self, name: &str) -> bool {
        self.known_names.iter().any(|n| n == name)
    }
}

fn snapshot(m: &ResourceMap) -> Vec<Candidate> {
    m.iter()
        .enumerate()
        .map(|(index, r)| {
            let mut known_names: Vec<String> = vec![r.org_id().name.clone()];
            for (_, name) in r.prior_names() {
                if !known_names.contains(name) {
                    known_names.push(name.clone());
                }
            }
            Candidate {
                index,
                gvk: r.gvk().clone(),
                cur_name: r.name().to_string(),
                cur_namespace: r.namespace().to_string(),
                org_namespace: r.org_id().namespace.clone(),
                effective_namespace: r.cur_id().effective_namespace(),
                cluster_scoped: r.gvk().is_cluster_scoped(),
                known_names,
            }
        })
        .collect()
}

impl Transformer for NameReferenceTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        let candidates = snapshot(m);
        let mut edges: Vec<(usize, ResId)> = Vec::new();
        for referrer_index in 0..m.len() {
            let referrer_id = m
                .get(referrer_index)
                .expect("index is in range")
                .cur_id()
                .clone();
            let referrer_ns = referrer_id.effective_namespace();
            for backref in &self.backrefs {
                for spec in &backref.field_specs {
                    if !referrer_id.gvk.is_selected(&spec.gvk) {
                        continue;
                    }
                    let segments = spec.segments()?;
                    let resource = m.get_mut(referrer_index).expect("index is in range");
                    mutate_field(resource.map_mut(), &segments, false, &mut |value| {
                        let referents = rewrite_leaf(
                            value,
                            &backref.gvk,
                            &candidates,
                            referrer_index,
                            &referrer_ns,
                        )?;
                        for index in referents {
                            edges.push((index, referrer_id.clone()));
                        }
                        Ok(())
                    })
                    .with_context(|| {
                        format!(
                            "resolving {} references in {referrer_id}",
                            backref.gvk.kind
                        )
                    })?;
                }
            }
        }
        for (index, referrer) in edges {
            if let Some(referent) = m.get_mut(index) {
                referent.add_ref_by(referrer);
            }
        }
        Ok(())
    }
}

/// Rewrite one leaf; returns the candidate indices that were referenced.
fn rewrite_leaf(
    value: &mut Value,
    target: &Gvk,
    candidates: &[Candidate],
    referrer_index: usize,
    referrer_ns: &str,
) -> Result<Vec<usize>> {
    let mut referents = Vec::new();
    match value {
        Value::String(name) => {
            if let Some(c) =
                lookup_by_name(name, target, candidates, referrer_index, referrer_ns)?
            {
                referents.push(c.index);
                *value = Value::from(c.cur_name.clone());
            }
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                match item {
                    Value::String(name) => {
                        if let Some(c) = lookup_by_name(
                            name,
                            target,
                            candidates,
                            referrer_index,
                            referrer_ns,
                        )? {
                            referents.push(c.index);
                            *item = Value::from(c.cur_name.clone());
                        }
                    }
                    Value::Mapping(_) => {
                        if let Some(index) = rewrite_reference_entry(
                            item,
                            target,
                            candidates,
                            referrer_index,
                            referrer_ns,
                        )? {
                            referents.push(index);
                        }
                    }
                    _ => {}
                }
            }
        }
        Value::Mapping(_) => {
            if let Some(index) =
                rewrite_reference_entry(value, target, candidates, referrer_index, referrer_ns)?
            {
                referents.push(index);
            }
        }
        _ => {}
    }
    Ok(referents)
}

/// Resolve a bare name against the candidate set: the Gvk must be in the
/// target selection, the name must be an original or prior name, and the
/// referent must share the referrer's effective namespace unless it is
/// cluster-scoped.
fn lookup_by_name<'a>(
    name: &str,
    target: &Gvk,
    candidates: &'a [Candidate],
    referrer_index: usize,
    referrer_ns: &str,
) -> Result<Option<&'a Candidate>> {
    let matches: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.index != referrer_index)
        .filter(|c| c.gvk.is_selected(target))
        .filter(|c| c.was_named(name))
        .filter(|c| c.cluster_scoped || c.effective_namespace == referrer_ns)
        .collect();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches[0])),
        n => Err(Error::Ambiguous(format!(
            "{n} matches for {} reference to {name:?}",
            target.kind
        ))
        .into()),
    }
}

/// Resolve a `{name, namespace}` reference entry (a binding subject or a
/// webhook service ref). The entry's own namespace, when present, must
/// match the namespace the referent was declared in; on a unique match
/// both fields are rewritten to the referent's current values.
fn rewrite_reference_entry(
    entry: &mut Value,
    target: &Gvk,
    candidates: &[Candidate],
    referrer_index: usize,
    referrer_ns: &str,
) -> Result<Option<usize>> {
    let Some(map) = entry.as_mapping() else {
        return Ok(None);
    };
    let Some(name) = map.get("name").and_then(Value::as_str).map(str::to_string) else {
        return Ok(None);
    };
    if let Some(kind) = map.get("kind").and_then(Value::as_str) {
        if kind != target.kind {
            return Ok(None);
        }
    }
    let entry_ns = map
        .get("namespace")
        .and_then(Value::as_str)
        .map(str::to_string);
    let matches: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.index != referrer_index)
        .filter(|c| c.gvk.is_selected(target))
        .filter(|c| c.was_named(&name))
        .filter(|c| match &entry_ns {
            Some(ns) => c.org_namespace == *ns,
            None => c.cluster_scoped || c.effective_namespace == referrer_ns,
        })
        .collect();
    let chosen = match matches.len() {
        0 => return Ok(None),
        1 => matches[0],
        n => {
            return Err(Error::Ambiguous(format!(
                "{n} matches for {} reference entry {name:?}",
                target.kind
            ))
            .into())
        }
    };
    let map = entry
        .as_mapping_mut()
        .expect("entry was checked to be a mapping");
    map.insert(Value::from("name"), Value::from(chosen.cur_name.as_str()));
    if !chosen.cur_namespace.is_empty() {
        map.insert(
            Value::from("namespace"),
            Value::from(chosen.cur_namespace.as_str()),
        );
    }
    Ok(Some(chosen.index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;
    use crate::transform::config::default_config;

    fn map_of(yaml: &str) -> ResourceMap {
        let mut m = ResourceMap::new();
        for r in Resource::parse_all(yaml.as_bytes()).unwrap() {
            m.append(r).unwrap();
        }
        m
    }

    fn transformer() -> NameReferenceTransformer {
        NameReferenceTransformer::new(default_config().name_reference.clone())
    }

    #[test]
    fn configmap_volume_follows_rename() {
        let mut m = map_of(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  template:\n    spec:\n      volumes:\n      - name: config\n        configMap:\n          name: cm1\n",
        );
        {
            let cm = m.get_mut(0).unwrap();
            cm.record_prior_name();
            cm.set_name("p1-cm1");
        }
        transformer().transform(&mut m).unwrap();
        let volume_ref = m
            .get(1)
            .unwrap()
            .map()
            .get("spec")
            .unwrap()
            .get("template")
            .unwrap()
            .get("spec")
            .unwrap()
            .get("volumes")
            .unwrap()[0]
            .get("configMap")
            .unwrap()
            .get("name")
            .unwrap()
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(volume_ref, "p1-cm1");
        assert_eq!(m.get(0).unwrap().ref_by().len(), 1);
    }

    #[test]
    fn subjects_follow_name_and_namespace() {
        let mut m = map_of(
            "apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: sa1\n  namespace: ns1\n---\napiVersion: rbac.authorization.k8s.io/v1\nkind: ClusterRoleBinding\nmetadata:\n  name: crb\nsubjects:\n- kind: ServiceAccount\n  name: sa1\n  namespace: ns1\n- kind: ServiceAccount\n  name: sa3\n  namespace: random\n",
        );
        {
            let sa = m.get_mut(0).unwrap();
            sa.record_prior_name();
            sa.set_name("p1-sa1-s1");
            sa.set_namespace("newnamespace");
        }
        transformer().transform(&mut m).unwrap();
        let subjects = m.get(1).unwrap().map().get("subjects").unwrap().clone();
        assert_eq!(subjects[0].get("name").unwrap().as_str(), Some("p1-sa1-s1"));
        assert_eq!(
            subjects[0].get("namespace").unwrap().as_str(),
            Some("newnamespace")
        );
        assert_eq!(subjects[1].get("name").unwrap().as_str(), Some("sa3"));
        assert_eq!(subjects[1].get("namespace").unwrap().as_str(), Some("random"));
    }

    #[test]
    fn namespace_scoping_limits_string_lookups() {
        // A Deployment in ns "a" must not pick up the ConfigMap of ns "b".
        let mut m = map_of(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n  namespace: b\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n  namespace: a\nspec:\n  template:\n    spec:\n      volumes:\n      - name: v\n        configMap:\n          name: cm\n",
        );
        {
            let cm = m.get_mut(0).unwrap();
            cm.record_prior_name();
            cm.set_name("renamed-cm");
        }
        transformer().transform(&mut m).unwrap();
        let volume_ref = m
            .get(1)
            .unwrap()
            .map()
            .get("spec")
            .unwrap()
            .get("template")
            .unwrap()
            .get("spec")
            .unwrap()
            .get("volumes")
            .unwrap()[0]
            .get("configMap")
            .unwrap()
            .get("name")
            .unwrap()
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(volume_ref, "cm");
    }
}
