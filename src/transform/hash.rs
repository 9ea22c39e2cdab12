//! Content-hash suffixing of generated resources.
//!
//! The hash input is a canonical JSON encoding (sorted keys) of the fields
//! that define the resource's payload; the sha256 hex digest is remapped
//! onto a restricted alphabet so the suffix stays legal in a resource name
//! under every alphanumeric constraint, and truncated to 10 characters.

use crate::error::Error;
use crate::resmap::ResourceMap;
use crate::resource::Resource;
use crate::transform::Transformer;
use anyhow::{Context, Result};
use serde_json::json;
use sha2::{Digest, Sha256};

#[derive(Debug)]
pub struct HashTransformer;

impl Transformer for HashTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        for resource in m.iter_mut() {
            if !resource.need_hash_suffix() {
                continue;
            }
            let suffix = hash_resource(resource)
                .with_context(|| format!("hashing {}", resource.cur_id()))?;
            let renamed = format!("{}-{}", resource.name(), suffix);
            resource.record_prior_name();
            resource.set_name(&renamed);
            resource.set_need_hash_suffix(false);
        }
        Ok(())
    }
}

/// Compute the name suffix for a resource.
pub fn hash_resource(resource: &Resource) -> Result<String> {
    let encoded = canonical_payload(resource)?;
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    let digest = hasher.finalize();
    encode(&hex_string(&digest))
}

/// Hash over a sorted list of strings, used by the inventory annotations.
pub fn hash_sorted_strings(items: &[String]) -> Result<String> {
    let mut sorted = items.to_vec();
    sorted.sort();
    let encoded = serde_json::to_string(&sorted).context("encoding hash input")?;
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    encode(&hex_string(&hasher.finalize()))
}

fn canonical_payload(resource: &Resource) -> Result<String> {
    let kind = resource.gvk().kind.as_str();
    let content: serde_json::Value = serde_json::to_value(resource.map())
        .with_context(|| format!("encoding {} for hashing", resource.cur_id()))?;
    let payload = match kind {
        "ConfigMap" | "Secret" => {
            let mut payload = json!({
                "kind": kind,
                "name": resource.name(),
                "data": content.get("data").cloned().unwrap_or(json!({})),
            });
            for optional in ["binaryData", "immutable", "type"] {
                if let Some(v) = content.get(optional) {
                    payload[optional] = v.clone();
                }
            }
            payload
        }
        _ => content,
    };
    // serde_json maps are sorted by key, which makes this encoding
    // canonical.
    serde_json::to_string(&payload).context("encoding hash payload")
}

fn hex_string(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Take the first 10 hex runes, remapping the characters that are illegal
/// or confusing in resource names.
fn encode(hex: &str) -> Result<String> {
    if hex.len() < 10 {
        return Err(Error::MalformedInput(format!("hash {hex:?} is too short")).into());
    }
    Ok(hex[..10]
        .chars()
        .map(|c| match c {
            '0' => 'g',
            '1' => 'h',
            '3' => 'k',
            'a' => 'q',
            'e' => 'm',
            'u' => 'z',
            other => other,
        })
        .collect())
}
