//! # Transformer framework
//!
//! Every transformation is an in-place mutation of a [`ResourceMap`],
//! expressed through the [`Transformer`] trait. Field-spec driven
//! transformers share [`mutate_field`], which walks a document tree along
//! a parsed path and rewrites the leaf.
//!
//! Path grammar: segments separated by `.` (or `/`, as user configuration
//! files commonly write them), with `[n]` numeric list indices, `[*]` (or a
//! bare `*` segment) for descending into every list element, and
//! `key=value` for selecting matching elements of a list of mappings.

use crate::error::Error;
use crate::resmap::ResourceMap;
use anyhow::Result;
use serde_yaml::{Mapping, Value};

pub mod annotations;
pub mod config;
pub mod hash;
pub mod image;
pub mod inventory;
pub mod labels;
pub mod nameref;
pub mod namespace;
pub mod order;
pub mod patch_json6902;
pub mod patch_strategic;
pub mod prefix_suffix;
pub mod varref;

/// An in-place mutation of the resource map. Failure aborts the build.
pub trait Transformer: std::fmt::Debug {
    fn transform(&self, m: &mut ResourceMap) -> Result<()>;
}

/// One step of a parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Descend into a mapping key.
    Field(String),
    /// Descend into the n-th element of a sequence.
    Index(usize),
    /// Descend into every element of a sequence.
    Wildcard,
    /// Descend into the sequence elements whose `key` equals `value`.
    Select { key: String, value: String },
}

/// Parse a field path into segments.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    let separator = if path.contains('/') { '/' } else { '.' };
    let mut segments = Vec::new();
    for token in path.split(separator) {
        if token.is_empty() {
            continue;
        }
        let (head, brackets) = match token.find('[') {
            Some(open) => (&token[..open], &token[open..]),
            None => (token, ""),
        };
        match head {
            "" => {}
            "*" => segments.push(PathSegment::Wildcard),
            _ => match head.split_once('=') {
                Some((key, value)) => segments.push(PathSegment::Select {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
                None => segments.push(PathSegment::Field(head.to_string())),
            },
        }
        for part in brackets.split('[').skip(1) {
            let inner = part.strip_suffix(']').ok_or_else(|| {
                Error::MalformedInput(format!("unbalanced brackets in path: {path}"))
            })?;
            if inner == "*" {
                segments.push(PathSegment::Wildcard);
            } else {
                let index = inner.parse::<usize>().map_err(|_| {
                    Error::MalformedInput(format!("bad list index in path: {path}"))
                })?;
                segments.push(PathSegment::Index(index));
            }
        }
    }
    Ok(segments)
}

/// Walk `root` along `path` and apply `f` to the leaf value. Missing
/// intermediate keys end the walk silently unless `create_if_missing`, in
/// which case empty mappings are created along the way (including at the
/// leaf, which `f` then sees as an empty mapping).
pub fn mutate_field(
    root: &mut Mapping,
    path: &[PathSegment],
    create_if_missing: bool,
    f: &mut dyn FnMut(&mut Value) -> Result<()>,
) -> Result<()> {
    let mut wrapper = Value::Mapping(std::mem::take(root));
    let result = mutate_value(&mut wrapper, path, create_if_missing, f);
    if let Value::Mapping(m) = wrapper {
        *root = m;
    }
    result
}

fn mutate_value(
    value: &mut Value,
    path: &[PathSegment],
    create_if_missing: bool,
    f: &mut dyn FnMut(&mut Value) -> Result<()>,
) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        return f(value);
    };
    match head {
        PathSegment::Field(name) => {
            let Some(map) = value.as_mapping_mut() else {
                return Ok(());
            };
            if !map.contains_key(name.as_str()) {
                if !create_if_missing {
                    return Ok(());
                }
                map.insert(Value::from(name.as_str()), Value::Mapping(Mapping::new()));
            }
            let next = map
                .get_mut(name.as_str())
                .expect("key presence was just ensured");
            mutate_value(next, rest, create_if_missing, f)
        }
        PathSegment::Index(i) => {
            let Some(seq) = value.as_sequence_mut() else {
                return Ok(());
            };
            match seq.get_mut(*i) {
                Some(element) => mutate_value(element, rest, create_if_missing, f),
                None => Ok(()),
            }
        }
        PathSegment::Wildcard => {
            let Some(seq) = value.as_sequence_mut() else {
                return Ok(());
            };
            for element in seq.iter_mut() {
                mutate_value(element, rest, create_if_missing, f)?;
            }
            Ok(())
        }
        PathSegment::Select { key, value: want } => {
            let Some(seq) = value.as_sequence_mut() else {
                return Ok(());
            };
            for element in seq.iter_mut() {
                let matches = element
                    .get(key.as_str())
                    .and_then(Value::as_str)
                    .map(|v| v == want)
                    .unwrap_or(false);
                if matches {
                    mutate_value(element, rest, create_if_missing, f)?;
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn parse_dotted_and_slashed_paths() {
        assert_eq!(
            parse_path("metadata.name").unwrap(),
            vec![
                PathSegment::Field("metadata".into()),
                PathSegment::Field("name".into())
            ]
        );
        assert_eq!(
            parse_path("spec/template/metadata/labels").unwrap().len(),
            4
        );
        assert_eq!(
            parse_path("spec.containers[*].image").unwrap(),
            vec![
                PathSegment::Field("spec".into()),
                PathSegment::Field("containers".into()),
                PathSegment::Wildcard,
                PathSegment::Field("image".into())
            ]
        );
        assert_eq!(
            parse_path("spec.ports[0].protocol").unwrap()[2],
            PathSegment::Index(0)
        );
        assert_eq!(
            parse_path("volumes.name=config.mountPath").unwrap()[1],
            PathSegment::Select {
                key: "name".into(),
                value: "config".into()
            }
        );
    }

    #[test]
    fn mutate_replaces_leaf_string() {
        let mut m = mapping("metadata:\n  name: old\n");
        let path = parse_path("metadata.name").unwrap();
        mutate_field(&mut m, &path, false, &mut |v| {
            *v = Value::from("new");
            Ok(())
        })
        .unwrap();
        assert_eq!(
            m.get("metadata").unwrap().get("name").unwrap().as_str(),
            Some("new")
        );
    }

    #[test]
    fn missing_path_is_a_noop_without_create() {
        let mut m = mapping("metadata:\n  name: x\n");
        let path = parse_path("spec.replicas").unwrap();
        let mut called = false;
        mutate_field(&mut m, &path, false, &mut |_| {
            called = true;
            Ok(())
        })
        .unwrap();
        assert!(!called);
        assert!(m.get("spec").is_none());
    }

    #[test]
    fn create_if_missing_builds_intermediate_mappings() {
        let mut m = mapping("kind: Service\n");
        let path = parse_path("metadata.labels").unwrap();
        mutate_field(&mut m, &path, true, &mut |v| {
            let labels = v.as_mapping_mut().unwrap();
            labels.insert(Value::from("app"), Value::from("web"));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            m.get("metadata")
                .unwrap()
                .get("labels")
                .unwrap()
                .get("app")
                .unwrap()
                .as_str(),
            Some("web")
        );
    }

    #[test]
    fn wildcard_visits_every_element() {
        let mut m = mapping(
            "spec:\n  containers:\n  - image: a\n  - image: b\n",
        );
        let path = parse_path("spec.containers[*].image").unwrap();
        let mut seen = Vec::new();
        mutate_field(&mut m, &path, false, &mut |v| {
            seen.push(v.as_str().unwrap().to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn selector_narrows_list_elements() {
        let mut m = mapping(
            "spec:\n  ports:\n  - name: http\n    port: 80\n  - name: metrics\n    port: 9100\n",
        );
        let path = parse_path("spec.ports.name=metrics.port").unwrap();
        mutate_field(&mut m, &path, false, &mut |v| {
            *v = Value::from(9200);
            Ok(())
        })
        .unwrap();
        let ports = m.get("spec").unwrap().get("ports").unwrap();
        assert_eq!(ports[0].get("port").unwrap().as_i64(), Some(80));
        assert_eq!(ports[1].get("port").unwrap().as_i64(), Some(9200));
    }
}
