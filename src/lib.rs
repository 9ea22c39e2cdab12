//! # kompost
//!
//! Declarative composition of Kubernetes manifests. Given a directory
//! holding a kustomization descriptor, the library recursively loads base
//! configurations and local overlays, applies a deterministic ordered set
//! of transformations (name decoration, label and annotation injection,
//! image retagging, strategic and JSON patching, name-reference rewriting,
//! variable substitution, content-hash suffixing of generated resources),
//! and emits a stable stream of YAML documents.
//!
//! Input artifacts are never mutated; the output is a pure function of the
//! input tree.
//!
//! ## Entry point
//!
//! ```rust,no_run
//! use kompost::loader::Loader;
//! use kompost::target::KustTarget;
//!
//! # fn main() -> anyhow::Result<()> {
//! let ldr = Loader::new_at_root(std::path::Path::new("overlays/prod"))?;
//! let map = KustTarget::new(ldr)?.make_customized_res_map()?;
//! print!("{}", map.as_yaml()?);
//! # Ok(())
//! # }
//! ```

pub mod crds;
pub mod error;
pub mod generator;
pub mod gvk;
pub mod kustfile;
pub mod loader;
pub mod plugins;
pub mod resid;
pub mod resmap;
pub mod resource;
pub mod target;
pub mod transform;

pub use error::Error;
pub use gvk::Gvk;
pub use resid::ResId;
pub use resmap::ResourceMap;
pub use resource::Resource;
