//! RFC 6902 patching of a single target resource.
//!
//! The patch body may be JSON or YAML; a body that does not begin with
//! `[` is converted from YAML to JSON before decoding. An empty operation
//! list is rejected at configuration time, not silently applied.

use crate::error::Error;
use crate::resid::ResId;
use crate::resmap::ResourceMap;
use crate::transform::patch_strategic::find_target;
use crate::transform::Transformer;
use anyhow::{Context, Result};
use json_patch::Patch;

#[derive(Debug)]
pub struct PatchJson6902Transformer {
    target: ResId,
    patch: Patch,
}

impl PatchJson6902Transformer {
    pub fn new(target: ResId, ops: &str) -> Result<Self> {
        if target.name.is_empty() {
            return Err(Error::MalformedInput("must specify the target name".to_string()).into());
        }
        let ops = ops.trim();
        if ops.is_empty() {
            return Err(Error::MalformedInput("empty json patch operations".to_string()).into());
        }
        let json: serde_json::Value = if ops.starts_with('[') {
            serde_json::from_str(ops)
                .map_err(|e| Error::MalformedInput(format!("json patch: {e}")))?
        } else {
            // Not JSON; treat it as YAML and convert.
            let yaml: serde_yaml::Value = serde_yaml::from_str(ops)
                .map_err(|e| Error::MalformedInput(format!("yaml patch: {e}")))?;
            serde_json::to_value(yaml).context("converting yaml patch to json")?
        };
        let patch: Patch = serde_json::from_value(json)
            .map_err(|e| Error::MalformedInput(format!("decoding json patch: {e}")))?;
        if patch.0.is_empty() {
            return Err(Error::MalformedInput("patch appears to be empty".to_string()).into());
        }
        Ok(PatchJson6902Transformer { target, patch })
    }
}

impl Transformer for PatchJson6902Transformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        let index = find_target(m, &self.target)
            .with_context(|| format!("finding json6902 patch target {}", self.target))?;
        let resource = m.get_mut(index).expect("index was just found");
        let mut doc = resource.as_json()?;
        json_patch::patch(&mut doc, &self.patch)
            .with_context(|| format!("applying json patch to {}", self.target))?;
        resource.set_content_from_json(doc)
    }
}
