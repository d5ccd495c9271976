use std::path::PathBuf;

use thiserror::Error;

use crate::scene::NodeId;

/// Failures reported by the document host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("node not found: {0}")]
    MissingNode(NodeId),

    #[error("invalid rescale ratio {ratio} for node {node} (minimum is 0.01)")]
    InvalidScale { node: NodeId, ratio: f64 },

    #[error("export failed for node {node}: {reason}")]
    Export { node: NodeId, reason: String },

    #[error("invalid tree operation: {0}")]
    Structure(String),

    #[error("node {node} already has a dev resource for {url}")]
    DuplicateResource { node: NodeId, url: String },
}

/// Failures reported by client storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("client storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("client storage at {path} is not a JSON object: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
