//! # Builtin plugin registry
//!
//! Entries of the descriptor's `generators` and `transformers` lists are
//! YAML documents whose `kind` names a plugin. Only the builtin kinds are
//! resolvable; dynamic loading of external plugins is disabled by design,
//! and an unknown kind fails with a pointer at the plugin root that would
//! hold it.

use crate::error::Error;
use crate::generator::{ConfigMapGenerator, Generator, SecretGenerator};
use crate::kustfile::{GeneratorArgs, GeneratorOptions, SecretArgs, Target};
use crate::loader::Loader;
use crate::resource::Resource;
use crate::transform::annotations::AnnotationsTransformer;
use crate::transform::config::{FieldSpec, TransformerConfig};
use crate::transform::hash::HashTransformer;
use crate::transform::image::{Image, ImageTagTransformer};
use crate::transform::inventory::InventoryTransformer;
use crate::transform::labels::LabelTransformer;
use crate::transform::namespace::NamespaceTransformer;
use crate::transform::order::LegacyOrderTransformer;
use crate::transform::patch_json6902::PatchJson6902Transformer;
use crate::transform::patch_strategic::PatchStrategicMergeTransformer;
use crate::transform::prefix_suffix::PrefixSuffixTransformer;
use crate::transform::Transformer;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Where external plugins would live: `$XDG_CONFIG_HOME/kompost/plugin`,
/// falling back to `$HOME/.config/kompost/plugin`.
pub fn config_root() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_default();
    base.join("kompost").join("plugin")
}

#[derive(Debug, Default, Deserialize)]
struct PluginMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Deserialize)]
struct PluginHeader {
    kind: String,
    #[serde(default)]
    metadata: PluginMeta,
}

fn not_enabled(kind: &str) -> anyhow::Error {
    Error::Forbidden(format!(
        "unable to load plugin {kind}: external plugins are disabled, and no builtin by that \
         name exists (external plugins would be searched under {})",
        config_root().display()
    ))
    .into()
}

fn parse_header(bytes: &[u8]) -> Result<PluginHeader> {
    serde_yaml::from_slice(bytes)
        .map_err(|e| Error::MalformedInput(format!("plugin configuration: {e}")).into())
}

/// Resolve a generator plugin configuration to a builtin generator.
pub fn generator_from_config(
    options: Option<&GeneratorOptions>,
    bytes: &[u8],
) -> Result<Box<dyn Generator>> {
    let header = parse_header(bytes)?;

    #[derive(Debug, Deserialize)]
    struct GeneratorPluginConfig {
        #[serde(default)]
        metadata: PluginMeta,
        #[serde(flatten)]
        args: GeneratorArgs,
        #[serde(default, rename = "type")]
        secret_type: String,
    }

    let mut config: GeneratorPluginConfig = serde_yaml::from_slice(bytes)
        .map_err(|e| Error::MalformedInput(format!("{} configuration: {e}", header.kind)))?;
    config.args.name = config.metadata.name.clone();
    config.args.namespace = config.metadata.namespace.clone();

    match header.kind.as_str() {
        "ConfigMapGenerator" => Ok(Box::new(ConfigMapGenerator::new(
            config.args,
            options.cloned(),
        ))),
        "SecretGenerator" => Ok(Box::new(SecretGenerator::new(
            SecretArgs {
                generator_args: config.args,
                secret_type: config.secret_type,
            },
            options.cloned(),
        ))),
        kind => Err(not_enabled(kind)),
    }
}

/// Resolve a transformer plugin configuration to a builtin transformer.
pub fn transformer_from_config(
    ldr: &Loader,
    tconfig: &TransformerConfig,
    bytes: &[u8],
) -> Result<Box<dyn Transformer>> {
    let header = parse_header(bytes)?;
    match header.kind.as_str() {
        "LabelTransformer" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Config {
                #[serde(default)]
                labels: BTreeMap<String, String>,
                #[serde(default)]
                field_specs: Vec<FieldSpec>,
            }
            let config: Config = parse_config(&header.kind, bytes)?;
            let specs = or_default(config.field_specs, &tconfig.common_labels);
            Ok(Box::new(LabelTransformer::new(config.labels, specs)))
        }
        "AnnotationsTransformer" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Config {
                #[serde(default)]
                annotations: BTreeMap<String, String>,
                #[serde(default)]
                field_specs: Vec<FieldSpec>,
            }
            let config: Config = parse_config(&header.kind, bytes)?;
            let specs = or_default(config.field_specs, &tconfig.common_annotations);
            Ok(Box::new(AnnotationsTransformer::new(config.annotations, specs)))
        }
        "PrefixSuffixTransformer" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Config {
                #[serde(default)]
                prefix: String,
                #[serde(default)]
                suffix: String,
                #[serde(default)]
                field_specs: Vec<FieldSpec>,
            }
            let config: Config = parse_config(&header.kind, bytes)?;
            let specs = or_default(config.field_specs, &tconfig.name_prefix);
            Ok(Box::new(PrefixSuffixTransformer::new(
                &config.prefix,
                &config.suffix,
                specs,
            )))
        }
        "NamespaceTransformer" => {
            let config: PluginHeader = parse_header(bytes)?;
            Ok(Box::new(NamespaceTransformer::new(
                &config.metadata.namespace,
                tconfig.namespace.clone(),
            )))
        }
        "ImageTagTransformer" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Config {
                #[serde(default)]
                image_tag: Image,
                #[serde(default)]
                field_specs: Vec<FieldSpec>,
            }
            let config: Config = parse_config(&header.kind, bytes)?;
            let specs = or_default(config.field_specs, &tconfig.images);
            Ok(Box::new(ImageTagTransformer::new(config.image_tag, specs)?))
        }
        "PatchTransformer" | "PatchStrategicMergeTransformer" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Config {
                #[serde(default)]
                path: Option<String>,
                #[serde(default)]
                patch: Option<String>,
            }
            let config: Config = parse_config(&header.kind, bytes)?;
            let content = load_inline_or_path(ldr, &config.patch, &config.path)
                .with_context(|| format!("loading {} patch", header.kind))?;
            let patches = Resource::parse_all(content.as_bytes())?;
            Ok(Box::new(PatchStrategicMergeTransformer::new(patches)))
        }
        "PatchJson6902Transformer" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Config {
                target: Target,
                #[serde(default)]
                path: Option<String>,
                #[serde(default)]
                json_op: Option<String>,
            }
            let config: Config = parse_config(&header.kind, bytes)?;
            let ops = load_inline_or_path(ldr, &config.json_op, &config.path)
                .context("loading json6902 patch")?;
            Ok(Box::new(PatchJson6902Transformer::new(
                config.target.to_res_id(),
                &ops,
            )?))
        }
        "InventoryTransformer" => {
            #[derive(Deserialize)]
            struct Config {
                #[serde(default)]
                metadata: PluginMeta,
                #[serde(default)]
                policy: String,
            }
            let config: Config = parse_config(&header.kind, bytes)?;
            Ok(Box::new(InventoryTransformer::new(
                &config.metadata.name,
                &config.metadata.namespace,
                &config.policy,
            )?))
        }
        "LegacyOrderTransformer" => Ok(Box::new(LegacyOrderTransformer)),
        "HashTransformer" => Ok(Box::new(HashTransformer)),
        kind => Err(not_enabled(kind)),
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(kind: &str, bytes: &[u8]) -> Result<T> {
    serde_yaml::from_slice(bytes)
        .map_err(|e| Error::MalformedInput(format!("{kind} configuration: {e}")).into())
}

fn or_default(configured: Vec<FieldSpec>, shipped: &[FieldSpec]) -> Vec<FieldSpec> {
    if configured.is_empty() {
        shipped.to_vec()
    } else {
        configured
    }
}

/// A patch body may be inline or a path to load; exactly one is required.
pub(crate) fn load_inline_or_path(
    ldr: &Loader,
    inline: &Option<String>,
    path: &Option<String>,
) -> Result<String> {
    match (inline, path) {
        (Some(_), Some(_)) => {
            Err(Error::MalformedInput("must specify a path or an inline body, not both".to_string()).into())
        }
        (Some(inline), None) => Ok(inline.clone()),
        (None, Some(path)) => {
            let bytes = ldr.load(path)?;
            String::from_utf8(bytes)
                .map_err(|_| Error::MalformedInput(format!("patch {path:?} is not UTF-8")).into())
        }
        (None, None) => {
            Err(Error::MalformedInput("empty file path and empty inline body".to_string()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resmap::ResourceMap;
    use tempfile::TempDir;

    #[test]
    fn unknown_plugin_kind_is_forbidden() {
        let dir = TempDir::new().unwrap();
        let ldr = Loader::new_at_root(dir.path()).unwrap();
        let err = transformer_from_config(
            &ldr,
            &TransformerConfig::default(),
            b"apiVersion: someteam.example.com/v1\nkind: DatePrefixer\nmetadata:\n  name: whatever\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("plugins are disabled"));
    }

    #[test]
    fn builtin_label_transformer_resolves_and_runs() {
        let dir = TempDir::new().unwrap();
        let ldr = Loader::new_at_root(dir.path()).unwrap();
        let t = transformer_from_config(
            &ldr,
            crate::transform::config::default_config(),
            b"apiVersion: builtin\nkind: LabelTransformer\nmetadata:\n  name: add-app\nlabels:\n  app: web\n",
        )
        .unwrap();
        let mut m = ResourceMap::new();
        m.append(
            Resource::parse_all(b"apiVersion: v1\nkind: Service\nmetadata:\n  name: s\n")
                .unwrap()
                .remove(0),
        )
        .unwrap();
        t.transform(&mut m).unwrap();
        assert!(m.get(0).unwrap().map().get("metadata").unwrap().get("labels").is_some());
    }

    #[test]
    fn builtin_secret_generator_resolves(){
        let generator = generator_from_config(
            None,
            b"apiVersion: builtin\nkind: SecretGenerator\nmetadata:\n  name: mySecret\n  namespace: whatever\nbehavior: merge\nliterals:\n- FRUIT=apple\n",
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        let ldr = Loader::new_at_root(dir.path()).unwrap();
        let r = generator.generate(&ldr).unwrap();
        assert_eq!(r.name(), "mySecret");
        assert_eq!(r.namespace(), "whatever");
    }
}
