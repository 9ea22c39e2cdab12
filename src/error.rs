//! # Error taxonomy
//!
//! Build failures are classified so that callers (and tests) can tell a
//! missing file from an ambiguous selector without string matching.
//!
//! Most functions in this crate return `anyhow::Result`; when a failure has
//! a meaningful class it is constructed from one of these variants so the
//! class travels with the error chain.

use thiserror::Error;

/// Classified build failure.
///
/// Every variant carries a human-readable description of the resource,
/// path or URL implicated; callers prepend further context as the error
/// propagates.
#[derive(Debug, Error)]
pub enum Error {
    /// A descriptor, referenced file, or selected resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// More than one resource or variable resolution matched a selector.
    #[error("unable to disambiguate: {0}")]
    Ambiguous(String),

    /// Id collision across bases, or a transformation produced one.
    #[error("conflict: {0}")]
    Conflict(String),

    /// YAML/JSON parse failure, malformed URL, malformed patch.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Loader root escape or a disabled plugin load.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The git subprocess failed.
    #[error("git failure: {0}")]
    External(String),

    /// Loader recursion revisited an ancestor spec.
    #[error("cycle detected: {0}")]
    Cycle(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_error_text_is_greppable() {
        let err = Error::Ambiguous("2 matches for Service/elasticsearch".to_string());
        assert!(err.to_string().contains("unable to disambiguate"));
    }

    #[test]
    fn classification_survives_anyhow_chain() {
        let err: anyhow::Error = Error::Cycle("a -> b -> a".to_string()).into();
        let err = err.context("loading base b");
        assert!(err.chain().any(|e| e.downcast_ref::<Error>().is_some()));
    }
}
