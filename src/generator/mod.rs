//! # Generators
//!
//! ConfigMap and Secret generators turn key/value sources (literals,
//! files, and env files) into new resources. Key collisions across
//! sources are fatal. Generated resources opt into hash suffixing unless
//! disabled, and carry the configured merge behavior.

use crate::error::Error;
use crate::kustfile::{GeneratorArgs, GeneratorOptions};
use crate::loader::Loader;
use crate::resource::{GenerationBehavior, Resource};
use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};

pub mod configmap;
pub mod secret;

pub use configmap::ConfigMapGenerator;
pub use secret::SecretGenerator;

/// Produces one resource from configured sources.
pub trait Generator {
    fn generate(&self, ldr: &Loader) -> Result<Resource>;
}

pub(crate) fn parse_behavior(s: &str) -> Result<GenerationBehavior> {
    match s {
        "" | "create" => Ok(GenerationBehavior::Create),
        "replace" => Ok(GenerationBehavior::Replace),
        "merge" => Ok(GenerationBehavior::Merge),
        other => Err(Error::MalformedInput(format!("unknown generator behavior {other:?}")).into()),
    }
}

/// Gather the key/value pairs of all three source kinds, in declaration
/// order: literals, files, env files. Values stay as bytes; the Secret
/// generator encodes them, the ConfigMap generator requires UTF-8.
pub(crate) fn load_kv_pairs(
    ldr: &Loader,
    args: &GeneratorArgs,
) -> Result<Vec<(String, Vec<u8>)>> {
    let mut pairs: Vec<(String, Vec<u8>)> = Vec::new();

    for literal in &args.literals {
        let (key, value) = literal.split_once('=').ok_or_else(|| {
            Error::MalformedInput(format!("literal {literal:?} is not KEY=VALUE"))
        })?;
        add_pair(&mut pairs, key.trim(), value.as_bytes().to_vec())?;
    }

    for file in &args.files {
        let (key, path) = match file.split_once('=') {
            Some((key, path)) => (key.to_string(), path.to_string()),
            None => {
                let basename = std::path::Path::new(file)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| {
                        Error::MalformedInput(format!("file source {file:?} has no name"))
                    })?;
                (basename.to_string(), file.clone())
            }
        };
        let content = ldr
            .load(&path)
            .with_context(|| format!("loading file source {path:?}"))?;
        add_pair(&mut pairs, &key, content)?;
    }

    let mut env_files: Vec<&String> = args.envs.iter().collect();
    if let Some(env) = &args.env {
        env_files.push(env);
    }
    for env_file in env_files {
        let content = ldr
            .load(env_file)
            .with_context(|| format!("loading env file {env_file:?}"))?;
        let text = String::from_utf8(content)
            .map_err(|_| Error::MalformedInput(format!("env file {env_file:?} is not UTF-8")))?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            add_pair(&mut pairs, key.trim(), value.trim().as_bytes().to_vec())?;
        }
    }

    Ok(pairs)
}

fn add_pair(pairs: &mut Vec<(String, Vec<u8>)>, key: &str, value: Vec<u8>) -> Result<()> {
    if pairs.iter().any(|(k, _)| k == key) {
        return Err(Error::Conflict(format!(
            "cannot add key {key}, another key by that name already exists"
        ))
        .into());
    }
    pairs.push((key.to_string(), value));
    Ok(())
}

/// Assemble the generated document and its resource-level flags.
pub(crate) fn make_generated_resource(
    kind: &str,
    args: &GeneratorArgs,
    options: Option<&GeneratorOptions>,
    data: Mapping,
    extra_fields: Vec<(&str, Value)>,
) -> Result<Resource> {
    if args.name.is_empty() {
        return Err(Error::MalformedInput(format!("{kind} generator needs a name")).into());
    }
    let mut metadata = Mapping::new();
    metadata.insert(Value::from("name"), Value::from(args.name.as_str()));
    if !args.namespace.is_empty() {
        metadata.insert(Value::from("namespace"), Value::from(args.namespace.as_str()));
    }
    if let Some(options) = options {
        if !options.labels.is_empty() {
            let mut labels = Mapping::new();
            for (k, v) in &options.labels {
                labels.insert(Value::from(k.as_str()), Value::from(v.as_str()));
            }
            metadata.insert(Value::from("labels"), Value::Mapping(labels));
        }
        if !options.annotations.is_empty() {
            let mut annotations = Mapping::new();
            for (k, v) in &options.annotations {
                annotations.insert(Value::from(k.as_str()), Value::from(v.as_str()));
            }
            metadata.insert(Value::from("annotations"), Value::Mapping(annotations));
        }
    }

    let mut doc = Mapping::new();
    doc.insert(Value::from("apiVersion"), Value::from("v1"));
    doc.insert(Value::from("kind"), Value::from(kind));
    doc.insert(Value::from("metadata"), Value::Mapping(metadata));
    doc.insert(Value::from("data"), Value::Mapping(data));
    for (key, value) in extra_fields {
        doc.insert(Value::from(key), value);
    }

    let mut resource = Resource::from_mapping(doc)?;
    resource.set_behavior(parse_behavior(&args.behavior)?);
    let disable_hash = options.map(|o| o.disable_name_suffix_hash).unwrap_or(false);
    resource.set_need_hash_suffix(!disable_hash);
    Ok(resource)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behavior_parsing() {
        assert_eq!(parse_behavior("").unwrap(), GenerationBehavior::Create);
        assert_eq!(parse_behavior("merge").unwrap(), GenerationBehavior::Merge);
        assert_eq!(parse_behavior("replace").unwrap(), GenerationBehavior::Replace);
        assert!(parse_behavior("overwrite").is_err());
    }
}
