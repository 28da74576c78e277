//! Error type for descriptor parsing.

use thiserror::Error;

/// Errors produced while parsing animation-tree descriptors.
///
/// These are recoverable by design: the tree builder logs the failing subtree
/// and drops it rather than aborting the whole slide.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A begin/end timing attribute could not be parsed.
    #[error("invalid timing attribute: {0:?}")]
    InvalidTiming(String),

    /// A dur attribute could not be parsed.
    #[error("invalid duration attribute: {0:?}")]
    InvalidDuration(String),

    /// The descriptor names a node kind this engine does not know.
    #[error("unknown animation node name: {0:?}")]
    UnknownNodeName(String),

    /// A leaf descriptor is missing an attribute its node kind requires.
    #[error("node {node:?} is missing required attribute {attribute:?}")]
    MissingAttribute {
        node: String,
        attribute: &'static str,
    },

    /// The raw descriptor JSON did not match the schema.
    #[error("malformed descriptor: {0}")]
    Json(#[from] serde_json::Error),
}
