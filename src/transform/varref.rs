//! Variable resolution and `$(NAME)` expansion.
//!
//! Declared variables resolve to the field of exactly one resource;
//! ambiguity is fatal, and a variable with no resolving resource is fatal
//! unless it declares a default value. Strings at the configured field
//! specs are then rewritten: `$(NAME)` becomes the resolved value,
//! `$$(NAME)` escapes to a literal `$(NAME)`, and tokens naming undeclared
//! variables are left untouched.

use crate::error::Error;
use crate::kustfile::Var;
use crate::resmap::ResourceMap;
use crate::transform::config::FieldSpec;
use crate::transform::{mutate_field, Transformer};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_yaml::Value;
use std::collections::BTreeMap;

static VAR_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\$?\(([A-Za-z0-9_.-]+)\)").expect("token pattern is valid"));

/// Resolve every declared variable against the map. Resources that feed a
/// variable get the variable name recorded on them.
pub fn resolve_vars(vars: &[Var], m: &mut ResourceMap) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();
    for var in vars {
        let id = var.objref.to_res_id();
        let matches: Vec<usize> = m
            .iter()
            .enumerate()
            .filter(|(_, r)| id.selects(r.org_id()))
            .map(|(i, _)| i)
            .collect();
        let index = match matches.len() {
            0 => match &var.default_value {
                Some(default) => {
                    values.insert(var.name.clone(), default.clone());
                    continue;
                }
                None => {
                    return Err(Error::NotFound(format!(
                        "variable {:?} cannot be mapped to a field in the set of known resources",
                        var.name
                    ))
                    .into())
                }
            },
            1 => matches[0],
            n => {
                return Err(Error::Ambiguous(format!(
                    "{n} matches for objref {id} of variable {:?}",
                    var.name
                ))
                .into())
            }
        };
        let resource = m.get_mut(index).expect("index was just found");
        let field = resource
            .field_value(&var.field_path())
            .with_context(|| format!("resolving variable {:?}", var.name))?;
        let value = scalar_to_string(&field).ok_or_else(|| {
            Error::MalformedInput(format!(
                "variable {:?} resolved to a non-scalar field {:?}",
                var.name,
                var.field_path()
            ))
        })?;
        resource.add_ref_var_name(&var.name);
        values.insert(var.name.clone(), value);
    }
    Ok(values)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Substitute resolved variable values into every configured string field.
#[derive(Debug)]
pub struct VarReferenceTransformer {
    values: BTreeMap<String, String>,
    field_specs: Vec<FieldSpec>,
}

impl VarReferenceTransformer {
    pub fn new(values: BTreeMap<String, String>, field_specs: Vec<FieldSpec>) -> Self {
        VarReferenceTransformer {
            values,
            field_specs,
        }
    }

    fn expand(&self, s: &str) -> String {
        VAR_TOKEN
            .replace_all(s, |caps: &Captures| {
                let token = caps.get(0).expect("match exists").as_str();
                let name = caps.get(1).expect("token has a name").as_str();
                if token.starts_with("$$") {
                    format!("$({name})")
                } else {
                    match self.values.get(name) {
                        Some(value) => value.clone(),
                        None => token.to_string(),
                    }
                }
            })
            .into_owned()
    }

    fn expand_leaf(&self, value: &mut Value) -> Result<()> {
        match value {
            Value::String(s) => {
                *value = Value::from(self.expand(s));
            }
            Value::Sequence(items) => {
                // command and args lists.
                for item in items.iter_mut() {
                    if let Value::String(s) = item {
                        *item = Value::from(self.expand(s));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Transformer for VarReferenceTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        if self.values.is_empty() {
            return Ok(());
        }
        for resource in m.iter_mut() {
            let id = resource.org_id().clone();
            for spec in &self.field_specs {
                if !spec.applies_to(&id) {
                    continue;
                }
                let segments = spec.segments()?;
                mutate_field(resource.map_mut(), &segments, false, &mut |value| {
                    self.expand_leaf(value)
                })?;
            }
        }
        Ok(())
    }
}
