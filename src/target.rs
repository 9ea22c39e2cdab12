//! # Target build
//!
//! Resolving a kustomization directory into its final resource map: read
//! the descriptor, recursively accumulate bases and raw resources, run the
//! generators, and apply the overlay transformations in their fixed order.
//! The accumulator owns everything while the build is in flight; absorbing
//! a child transfers ownership.

use crate::crds::register_crds;
use crate::error::Error;
use crate::generator::{ConfigMapGenerator, Generator, SecretGenerator};
use crate::kustfile::{self, Kustomization, PatchEntry, Var};
use crate::loader::Loader;
use crate::plugins;
use crate::resmap::ResourceMap;
use crate::resource::Resource;
use crate::transform::annotations::AnnotationsTransformer;
use crate::transform::config::{default_config, TransformerConfig};
use crate::transform::hash::HashTransformer;
use crate::transform::image::ImageTagTransformer;
use crate::transform::inventory::InventoryTransformer;
use crate::transform::labels::LabelTransformer;
use crate::transform::nameref::NameReferenceTransformer;
use crate::transform::namespace::NamespaceTransformer;
use crate::transform::order::LegacyOrderTransformer;
use crate::transform::patch_json6902::PatchJson6902Transformer;
use crate::transform::patch_strategic::PatchStrategicMergeTransformer;
use crate::transform::prefix_suffix::PrefixSuffixTransformer;
use crate::transform::varref::{resolve_vars, VarReferenceTransformer};
use crate::transform::Transformer;
use anyhow::{Context, Result};
use tracing::debug;

/// In-flight composition state: resources, transformer configuration and
/// declared variables, merged across bases.
#[derive(Debug, Default)]
pub struct ResAccumulator {
    resmap: ResourceMap,
    tconfig: TransformerConfig,
    vars: Vec<Var>,
}

impl ResAccumulator {
    fn new() -> Self {
        ResAccumulator {
            resmap: ResourceMap::new(),
            tconfig: default_config().clone(),
            vars: Vec::new(),
        }
    }

    /// Union another accumulator into this one. Resource id conflicts
    /// across bases are fatal, as are duplicate variable names.
    fn merge_accumulator(&mut self, other: ResAccumulator) -> Result<()> {
        self.resmap.absorb_all(other.resmap)?;
        self.tconfig.merge(other.tconfig);
        self.merge_vars(other.vars)
    }

    fn merge_vars(&mut self, vars: Vec<Var>) -> Result<()> {
        for var in vars {
            if self.vars.iter().any(|v| v.name == var.name) {
                return Err(
                    Error::Conflict(format!("var {:?} already encountered", var.name)).into(),
                );
            }
            self.vars.push(var);
        }
        Ok(())
    }

    pub fn resmap(&self) -> &ResourceMap {
        &self.resmap
    }
}

/// A kustomization directory under resolution.
#[derive(Debug)]
pub struct KustTarget {
    ldr: Loader,
    kustomization: Kustomization,
}

impl KustTarget {
    /// Read the descriptor at the loader's root.
    pub fn new(ldr: Loader) -> Result<KustTarget> {
        let names = ldr.file_names()?;
        let descriptor = kustfile::descriptor_name(&names, &ldr.root().display().to_string())?;
        let bytes = ldr
            .load(&descriptor)
            .with_context(|| format!("reading {descriptor}"))?;
        let kustomization = Kustomization::from_bytes(&bytes)
            .with_context(|| format!("parsing {} in {}", descriptor, ldr.root().display()))?;
        Ok(KustTarget { ldr, kustomization })
    }

    pub fn kustomization(&self) -> &Kustomization {
        &self.kustomization
    }

    /// Build the final resource map: accumulate, resolve variables, hash
    /// generated resources, fix the references the hashing moved, and
    /// record the inventory if one is declared. Emission order is the
    /// declared order; see [`KustTarget::make_ordered_res_map`] for legacy
    /// ordering.
    pub fn make_customized_res_map(&self) -> Result<ResourceMap> {
        let mut ra = self.accumulate_target()?;
        let values = resolve_vars(&ra.vars, &mut ra.resmap).context("resolving variables")?;
        VarReferenceTransformer::new(values, ra.tconfig.var_reference.clone())
            .transform(&mut ra.resmap)?;
        HashTransformer.transform(&mut ra.resmap)?;
        // References to hashed names are fixed through the name history.
        NameReferenceTransformer::new(ra.tconfig.name_reference.clone())
            .transform(&mut ra.resmap)?;
        if let Some(inventory) = &self.kustomization.inventory {
            InventoryTransformer::new(
                &inventory.config_map.name,
                &inventory.config_map.namespace,
                &inventory.policy,
            )?
            .transform(&mut ra.resmap)
            .context("recording inventory")?;
        }
        Ok(ra.resmap)
    }

    /// Like [`KustTarget::make_customized_res_map`], then sorted into the
    /// legacy emit order.
    pub fn make_ordered_res_map(&self) -> Result<ResourceMap> {
        let mut m = self.make_customized_res_map()?;
        LegacyOrderTransformer.transform(&mut m)?;
        Ok(m)
    }

    fn accumulate_target(&self) -> Result<ResAccumulator> {
        let mut ra = ResAccumulator::new();
        self.accumulate_entries(&mut ra, &self.kustomization.resources, false)
            .context("accumulating resources")?;
        self.accumulate_entries(&mut ra, &self.kustomization.bases, true)
            .context("accumulating bases")?;

        for path in &self.kustomization.configurations {
            let bytes = self
                .ldr
                .load(path)
                .with_context(|| format!("loading transformer configuration {path}"))?;
            let config = TransformerConfig::from_bytes(&bytes)
                .with_context(|| format!("parsing transformer configuration {path}"))?;
            ra.tconfig.merge(config);
        }
        for path in &self.kustomization.crds {
            let bytes = self
                .ldr
                .load(path)
                .with_context(|| format!("loading crd {path}"))?;
            let additions =
                register_crds(&bytes).with_context(|| format!("registering crd {path}"))?;
            ra.tconfig.merge(additions);
        }

        self.run_generators(&mut ra)?;
        self.run_transformers(&mut ra)?;
        ra.merge_vars(self.kustomization.vars.clone())?;
        Ok(ra)
    }

    /// Accumulate `resources` or `bases` entries. A resource entry may be
    /// a file of manifests or a directory holding a descriptor; a base
    /// must be a directory.
    fn accumulate_entries(
        &self,
        ra: &mut ResAccumulator,
        entries: &[String],
        directories_only: bool,
    ) -> Result<()> {
        for path in entries {
            match self.ldr.new(path) {
                Ok(child_ldr) => {
                    debug!("accumulating base {path}");
                    let child = KustTarget::new(child_ldr)
                        .with_context(|| format!("couldn't make target for path {path:?}"))?;
                    let child_ra = child.accumulate_target()?;
                    ra.merge_accumulator(child_ra)
                        .with_context(|| format!("recursed accumulation of path {path:?}"))?;
                }
                Err(new_err) => {
                    if directories_only {
                        return Err(new_err.context(format!("base {path:?} is not a directory")));
                    }
                    let bytes = match self.ldr.load(path) {
                        Ok(bytes) => bytes,
                        Err(load_err) => {
                            return Err(load_err.context(format!(
                                "accumulating {path:?}: not a base and not a loadable file"
                            )))
                        }
                    };
                    let resources = Resource::parse_all(&bytes)
                        .with_context(|| format!("parsing {path}"))?;
                    for resource in resources {
                        let id = resource.cur_id().clone();
                        ra.resmap
                            .append(resource)
                            .with_context(|| format!("appending {id} from {path}"))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn run_generators(&self, ra: &mut ResAccumulator) -> Result<()> {
        let options = self.kustomization.generator_options.as_ref();
        let mut generators: Vec<Box<dyn Generator>> = Vec::new();
        for args in &self.kustomization.config_map_generator {
            generators.push(Box::new(ConfigMapGenerator::new(
                args.clone(),
                options.cloned(),
            )));
        }
        for args in &self.kustomization.secret_generator {
            generators.push(Box::new(SecretGenerator::new(args.clone(), options.cloned())));
        }
        for path in &self.kustomization.generators {
            let bytes = self
                .ldr
                .load(path)
                .with_context(|| format!("loading generator plugin config {path}"))?;
            generators.push(plugins::generator_from_config(options, &bytes)?);
        }
        for generator in generators {
            let resource = generator.generate(&self.ldr)?;
            let id = resource.cur_id().clone();
            ra.resmap
                .append(resource)
                .with_context(|| format!("appending generated resource {id}"))?;
        }
        Ok(())
    }

    /// The fixed transformation order of an overlay.
    fn run_transformers(&self, ra: &mut ResAccumulator) -> Result<()> {
        let k = &self.kustomization;
        let mut transformers: Vec<Box<dyn Transformer>> = vec![
            Box::new(AnnotationsTransformer::new(
                k.common_annotations.clone(),
                ra.tconfig.common_annotations.clone(),
            )),
            Box::new(LabelTransformer::new(
                k.common_labels.clone(),
                ra.tconfig.common_labels.clone(),
            )),
            Box::new(PrefixSuffixTransformer::new(
                &k.name_prefix,
                &k.name_suffix,
                ra.tconfig.name_prefix.clone(),
            )),
            Box::new(NamespaceTransformer::new(
                &k.namespace,
                ra.tconfig.namespace.clone(),
            )),
        ];
        for image in &k.images {
            transformers.push(Box::new(ImageTagTransformer::new(
                image.clone(),
                ra.tconfig.images.clone(),
            )?));
        }
        if !k.patches_strategic_merge.is_empty() {
            let mut patches = Vec::new();
            for path in &k.patches_strategic_merge {
                let bytes = self
                    .ldr
                    .load(path)
                    .with_context(|| format!("loading strategic merge patch {path}"))?;
                patches.extend(
                    Resource::parse_all(&bytes).with_context(|| format!("parsing patch {path}"))?,
                );
            }
            transformers.push(Box::new(PatchStrategicMergeTransformer::new(patches)));
        }
        for entry in &k.patches_json6902 {
            let ops = plugins::load_inline_or_path(&self.ldr, &entry.json_op, &entry.path)
                .with_context(|| format!("loading json6902 patch for {:?}", entry.target.name))?;
            transformers.push(Box::new(PatchJson6902Transformer::new(
                entry.target.to_res_id(),
                &ops,
            )?));
        }
        for entry in &k.patches {
            transformers.push(self.targeted_patch_transformer(entry)?);
        }
        transformers.push(Box::new(NameReferenceTransformer::new(
            ra.tconfig.name_reference.clone(),
        )));
        for path in &k.transformers {
            let bytes = self
                .ldr
                .load(path)
                .with_context(|| format!("loading transformer plugin config {path}"))?;
            transformers.push(plugins::transformer_from_config(
                &self.ldr,
                &ra.tconfig,
                &bytes,
            )?);
        }

        for transformer in transformers {
            transformer.transform(&mut ra.resmap)?;
        }
        Ok(())
    }

    /// A targeted entry of the generic `patches` list: strategic merge by
    /// default, RFC 6902 when the body is an operation list.
    fn targeted_patch_transformer(&self, entry: &PatchEntry) -> Result<Box<dyn Transformer>> {
        let PatchEntry::Targeted { path, patch, target } = entry else {
            // Bare paths were promoted to patchesStrategicMerge on read.
            return Err(Error::MalformedInput(
                "bare patches entry survived descriptor fix-up".to_string(),
            )
            .into());
        };
        let content = plugins::load_inline_or_path(&self.ldr, patch, path)
            .context("loading targeted patch")?;
        if content.trim_start().starts_with('[') {
            let target = target.as_ref().ok_or_else(|| {
                Error::MalformedInput("json6902 patches entry needs a target".to_string())
            })?;
            return Ok(Box::new(PatchJson6902Transformer::new(
                target.to_res_id(),
                &content,
            )?));
        }
        match target {
            Some(target) => {
                let mut bodies = Vec::new();
                for document in serde_yaml::Deserializer::from_str(&content) {
                    let value: serde_yaml::Value = serde::Deserialize::deserialize(document)
                        .map_err(|e| {
                            Error::MalformedInput(format!("targeted patch body: {e}"))
                        })?;
                    match value {
                        serde_yaml::Value::Mapping(m) => bodies.push(m),
                        serde_yaml::Value::Null => continue,
                        other => {
                            return Err(Error::MalformedInput(format!(
                                "targeted patch body is not a mapping: {other:?}"
                            ))
                            .into())
                        }
                    }
                }
                Ok(Box::new(PatchStrategicMergeTransformer::targeted(
                    target.to_res_id(),
                    bodies,
                )))
            }
            None => Ok(Box::new(PatchStrategicMergeTransformer::new(
                Resource::parse_all(content.as_bytes())?,
            ))),
        }
    }
}
