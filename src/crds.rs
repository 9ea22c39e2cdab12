//! CRD-derived schema additions.
//!
//! The `crds` descriptor field names files holding CustomResourceDefinition
//! manifests. Their OpenAPI schemas are scanned for the
//! `x-kubernetes-object-ref-*` markers, each of which turns into a
//! name-reference field spec: the custom kind refers to the marked kind at
//! the marked path.

use crate::error::Error;
use crate::gvk::Gvk;
use crate::resource::Resource;
use crate::transform::config::{FieldSpec, NameBackReferences, TransformerConfig};
use anyhow::Result;
use serde_yaml::Value;

const OBJECT_REF_KIND: &str = "x-kubernetes-object-ref-kind";
const OBJECT_REF_API_VERSION: &str = "x-kubernetes-object-ref-api-version";

/// Parse CRD manifests and derive transformer-configuration additions.
pub fn register_crds(bytes: &[u8]) -> Result<TransformerConfig> {
    let mut additions = TransformerConfig::default();
    for crd in Resource::parse_all(bytes)? {
        if crd.gvk().kind != "CustomResourceDefinition" {
            return Err(Error::MalformedInput(format!(
                "expected a CustomResourceDefinition, got {}",
                crd.cur_id()
            ))
            .into());
        }
        let Some(spec) = crd.map().get("spec") else {
            continue;
        };
        let Some(custom_kind) = spec
            .get("names")
            .and_then(|n| n.get("kind"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        for schema in schemas_of(spec) {
            let mut backrefs = Vec::new();
            walk_schema(schema, "", custom_kind, &mut backrefs);
            for backref in backrefs {
                additions.merge(TransformerConfig {
                    name_reference: vec![backref],
                    ..TransformerConfig::default()
                });
            }
        }
    }
    Ok(additions)
}

/// Both schema layouts are accepted: the legacy `spec.validation` and the
/// per-version `spec.versions[*].schema`.
fn schemas_of(spec: &Value) -> Vec<&Value> {
    let mut schemas = Vec::new();
    if let Some(schema) = spec
        .get("validation")
        .and_then(|v| v.get("openAPIV3Schema"))
    {
        schemas.push(schema);
    }
    if let Some(versions) = spec.get("versions").and_then(Value::as_sequence) {
        for version in versions {
            if let Some(schema) = version
                .get("schema")
                .and_then(|s| s.get("openAPIV3Schema"))
            {
                schemas.push(schema);
            }
        }
    }
    schemas
}

fn walk_schema(schema: &Value, path: &str, custom_kind: &str, out: &mut Vec<NameBackReferences>) {
    if let Some(ref_kind) = schema.get(OBJECT_REF_KIND).and_then(Value::as_str) {
        let target = match schema.get(OBJECT_REF_API_VERSION).and_then(Value::as_str) {
            Some(api_version) => Gvk::from_api_version_and_kind(api_version, ref_kind),
            None => Gvk::from_kind(ref_kind),
        };
        let ref_path = if path.is_empty() {
            "name".to_string()
        } else {
            format!("{path}.name")
        };
        out.push(NameBackReferences {
            gvk: target,
            field_specs: vec![FieldSpec::new(Gvk::from_kind(custom_kind), &ref_path, false)],
        });
    }
    let Some(properties) = schema.get("properties").and_then(Value::as_mapping) else {
        return;
    };
    for (key, child) in properties {
        let Some(name) = key.as_str() else { continue };
        let child_path = if path.is_empty() {
            name.to_string()
        } else {
            format!("{path}.{name}")
        };
        walk_schema(child, &child_path, custom_kind, out);
        // Array items carry their own schema one level down.
        if let Some(items) = child.get("items") {
            walk_schema(items, &format!("{child_path}[*]"), custom_kind, out);
        }
    }
}
