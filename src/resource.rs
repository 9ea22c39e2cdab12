//! # Resource
//!
//! A single parsed manifest: its YAML tree plus the metadata the composer
//! tracks across transformations: the id it was read with, the id it has
//! now, the names it used to carry, who references it, and how it behaves
//! when a generator collides with an existing id.

use crate::error::Error;
use crate::gvk::Gvk;
use crate::resid::ResId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// What happens when a generated resource collides with an existing id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationBehavior {
    #[default]
    Create,
    Replace,
    Merge,
}

/// A parsed manifest under transformation.
#[derive(Debug, Clone)]
pub struct Resource {
    map: Mapping,
    org_id: ResId,
    cur_id: ResId,
    name_history: Vec<(Gvk, String)>,
    ref_by: Vec<ResId>,
    ref_var_names: Vec<String>,
    need_hash_suffix: bool,
    behavior: GenerationBehavior,
}

impl Resource {
    /// Build a resource from a parsed document. The document must carry a
    /// `kind`; name and namespace come from `metadata` and may be absent.
    pub fn from_mapping(map: Mapping) -> Result<Resource> {
        let kind = map
            .get("kind")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::MalformedInput("document has no kind".to_string()))?;
        let api_version = map
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let gvk = if api_version.is_empty() {
            Gvk::from_kind(&kind)
        } else {
            Gvk::from_api_version_and_kind(&api_version, &kind)
        };
        let name = map
            .get("metadata")
            .and_then(Value::as_mapping)
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let namespace = map
            .get("metadata")
            .and_then(Value::as_mapping)
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let id = ResId::with_namespace(gvk, &name, &namespace);
        Ok(Resource {
            map,
            org_id: id.clone(),
            cur_id: id,
            name_history: Vec::new(),
            ref_by: Vec::new(),
            ref_var_names: Vec::new(),
            need_hash_suffix: false,
            behavior: GenerationBehavior::Create,
        })
    }

    /// Parse a (possibly multi-document) YAML stream into resources.
    /// Empty documents are skipped.
    pub fn parse_all(bytes: &[u8]) -> Result<Vec<Resource>> {
        let text = std::str::from_utf8(bytes).context("manifest is not valid UTF-8")?;
        let mut out = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(document)
                .map_err(|e| Error::MalformedInput(format!("YAML parse failure: {e}")))?;
            match value {
                Value::Null => continue,
                Value::Mapping(m) if m.is_empty() => continue,
                Value::Mapping(m) => out.push(Resource::from_mapping(m)?),
                other => {
                    return Err(Error::MalformedInput(format!(
                        "expected a mapping document, got: {other:?}"
                    ))
                    .into())
                }
            }
        }
        Ok(out)
    }

    pub fn map(&self) -> &Mapping {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut Mapping {
        &mut self.map
    }

    pub fn cur_id(&self) -> &ResId {
        &self.cur_id
    }

    pub fn org_id(&self) -> &ResId {
        &self.org_id
    }

    pub fn gvk(&self) -> &Gvk {
        &self.cur_id.gvk
    }

    pub fn name(&self) -> &str {
        &self.cur_id.name
    }

    pub fn namespace(&self) -> &str {
        &self.cur_id.namespace
    }

    fn metadata_mut(&mut self) -> &mut Mapping {
        if !self.map.contains_key("metadata") {
            self.map
                .insert(Value::from("metadata"), Value::Mapping(Mapping::new()));
        }
        self.map
            .get_mut("metadata")
            .and_then(Value::as_mapping_mut)
            .expect("metadata was just ensured to be a mapping")
    }

    /// Set the resource name, keeping `metadata.name` and the current id
    /// in sync.
    pub fn set_name(&mut self, name: &str) {
        self.metadata_mut()
            .insert(Value::from("name"), Value::from(name));
        self.cur_id.name = name.to_string();
    }

    /// Set the resource namespace, keeping `metadata.namespace` and the
    /// current id in sync.
    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .insert(Value::from("namespace"), Value::from(namespace));
        self.cur_id.namespace = namespace.to_string();
    }

    /// Record the current (Gvk, name) pair in the name history, so that
    /// reference rewrites downstream can still find this resource under
    /// the name it is about to lose.
    pub fn record_prior_name(&mut self) {
        let entry = (self.cur_id.gvk.clone(), self.cur_id.name.clone());
        if !self.name_history.contains(&entry) {
            self.name_history.push(entry);
        }
    }

    pub fn prior_names(&self) -> &[(Gvk, String)] {
        &self.name_history
    }

    /// True when this resource was originally known by `name`, either as
    /// its as-read name or through any entry of its name history.
    pub fn was_named(&self, name: &str) -> bool {
        if self.org_id.name == name {
            return true;
        }
        self.name_history.iter().any(|(_, n)| n == name)
    }

    pub fn add_ref_by(&mut self, referrer: ResId) {
        if !self.ref_by.contains(&referrer) {
            self.ref_by.push(referrer);
        }
    }

    pub fn ref_by(&self) -> &[ResId] {
        &self.ref_by
    }

    pub fn add_ref_var_name(&mut self, var: &str) {
        if !self.ref_var_names.iter().any(|v| v == var) {
            self.ref_var_names.push(var.to_string());
        }
    }

    pub fn need_hash_suffix(&self) -> bool {
        self.need_hash_suffix
    }

    pub fn set_need_hash_suffix(&mut self, need: bool) {
        self.need_hash_suffix = need;
    }

    pub fn behavior(&self) -> GenerationBehavior {
        self.behavior
    }

    pub fn set_behavior(&mut self, behavior: GenerationBehavior) {
        self.behavior = behavior;
    }

    /// Merge reference metadata from another incarnation of this resource
    /// (used when a `replace`-behavior generator overwrites in place).
    pub fn merge_ref_metadata(&mut self, other: &Resource) {
        for id in &other.ref_by {
            self.add_ref_by(id.clone());
        }
        for var in &other.ref_var_names {
            self.add_ref_var_name(var);
        }
        for entry in &other.name_history {
            if !self.name_history.contains(entry) {
                self.name_history.push(entry.clone());
            }
        }
    }

    /// The JSON form of the content, used by the RFC 6902 patcher.
    pub fn as_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.map)
            .with_context(|| format!("marshalling {} to JSON", self.cur_id))
    }

    /// Replace the content from a JSON tree, re-deriving the current id
    /// from the new `kind`/`metadata`.
    pub fn set_content_from_json(&mut self, value: serde_json::Value) -> Result<()> {
        let yaml: Value = serde_yaml::to_value(&value)
            .with_context(|| format!("unmarshalling patched {}", self.cur_id))?;
        let map = match yaml {
            Value::Mapping(m) => m,
            other => {
                return Err(Error::MalformedInput(format!(
                    "patched {} is no longer a mapping: {other:?}",
                    self.cur_id
                ))
                .into())
            }
        };
        let refreshed = Resource::from_mapping(map)?;
        self.map = refreshed.map;
        self.cur_id = refreshed.cur_id;
        Ok(())
    }

    /// Read the value at a dotted field path (with optional `[n]` list
    /// indices), as used by variable `fieldref`s.
    pub fn field_value(&self, field_path: &str) -> Result<Value> {
        let mut current = Value::Mapping(self.map.clone());
        for segment in field_path.split('.') {
            let (key, indices) = split_indices(segment)?;
            if !key.is_empty() {
                current = current
                    .get(key)
                    .cloned()
                    .ok_or_else(|| {
                        Error::NotFound(format!("field {field_path} in {}", self.cur_id))
                    })?;
            }
            for idx in indices {
                current = current
                    .as_sequence()
                    .and_then(|s| s.get(idx))
                    .cloned()
                    .ok_or_else(|| {
                        Error::NotFound(format!("field {field_path} in {}", self.cur_id))
                    })?;
            }
        }
        Ok(current)
    }
}

fn split_indices(segment: &str) -> Result<(&str, Vec<usize>)> {
    match segment.find('[') {
        None => Ok((segment, Vec::new())),
        Some(open) => {
            let key = &segment[..open];
            let mut indices = Vec::new();
            for part in segment[open..].split('[').skip(1) {
                let digits = part.strip_suffix(']').ok_or_else(|| {
                    Error::MalformedInput(format!("bad field path segment: {segment}"))
                })?;
                indices.push(digits.parse::<usize>().map_err(|_| {
                    Error::MalformedInput(format!("bad list index in segment: {segment}"))
                })?);
            }
            Ok((key, indices))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(yaml: &str) -> Resource {
        Resource::parse_all(yaml.as_bytes())
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn ids_reflect_content() {
        let r = parse_one(
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: svc1\n  namespace: ns1\n",
        );
        assert_eq!(r.cur_id().to_string(), "~G_v1_Service|ns1|svc1");
        assert_eq!(r.org_id(), r.cur_id());
    }

    #[test]
    fn rename_keeps_metadata_in_sync_and_history() {
        let mut r = parse_one("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n");
        r.record_prior_name();
        r.set_name("p1-cm1-s1");
        assert_eq!(r.name(), "p1-cm1-s1");
        assert_eq!(
            r.map()
                .get("metadata")
                .and_then(Value::as_mapping)
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str),
            Some("p1-cm1-s1")
        );
        assert!(r.was_named("cm1"));
        assert!(!r.was_named("cm2"));
    }

    #[test]
    fn set_namespace_creates_metadata() {
        let mut r = parse_one("kind: ConfigMap\nmetadata:\n  name: cm1\n");
        r.set_namespace("prod");
        assert_eq!(r.namespace(), "prod");
        assert_eq!(r.cur_id().to_string(), "~G_~V_ConfigMap|prod|cm1");
    }

    #[test]
    fn field_value_navigates_lists() {
        let r = parse_one(
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: es\nspec:\n  ports:\n  - name: transport\n    protocol: TCP\n",
        );
        assert_eq!(
            r.field_value("spec.ports[0].protocol").unwrap(),
            Value::from("TCP")
        );
        assert!(r.field_value("spec.ports[1].protocol").is_err());
    }

    #[test]
    fn multi_document_parse_skips_empty() {
        let docs = Resource::parse_all(
            b"---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: a\n---\n---\nkind: ConfigMap\nmetadata:\n  name: b\n",
        )
        .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn document_without_kind_is_rejected() {
        assert!(Resource::parse_all(b"metadata:\n  name: a\n").is_err());
    }
}
