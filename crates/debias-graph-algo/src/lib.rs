mod document;
mod graph;
mod paths;

use debias_core::NodeId;
use thiserror::Error;

pub use document::{EdgeRecord, GRAPH_SCHEMA_VERSION, GraphDocument, NodeRecord};
pub use graph::CausalGraph;
pub use paths::CausalPath;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown node '{node}'")]
    UnknownNode { node: NodeId },
    #[error("node id must not be empty")]
    EmptyNodeId,
    #[error("node id '{node}' has leading or trailing whitespace")]
    PaddedNodeId { node: NodeId },
    #[error("self-loop on '{node}' is not permitted")]
    SelfLoop { node: NodeId },
    #[error("edge {from} -> {to} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },
    #[error("no edge {from} -> {to}")]
    MissingEdge { from: NodeId, to: NodeId },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported graph document version '{0}'")]
    UnsupportedVersion(String),
}
