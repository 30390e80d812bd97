use std::fs;
use std::path::Path;

use debias_core::{Attributes, NodeId};
use serde::{Deserialize, Serialize};

use crate::{CausalGraph, GraphError};

pub const GRAPH_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub schema_version: String,
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl From<&CausalGraph> for GraphDocument {
    fn from(graph: &CausalGraph) -> Self {
        let mut nodes: Vec<NodeRecord> = graph
            .graph
            .node_indices()
            .map(|idx| {
                let data = &graph.graph[idx];
                NodeRecord {
                    id: data.id.clone(),
                    attrs: data.attrs.clone(),
                }
            })
            .collect();
        nodes.sort_by(|left, right| left.id.cmp(&right.id));

        let edges = graph
            .edges()
            .into_iter()
            .map(|(source, target)| {
                let attrs = graph
                    .edge_attrs(&source, &target)
                    .cloned()
                    .unwrap_or_default();
                EdgeRecord {
                    source,
                    target,
                    attrs,
                }
            })
            .collect();

        Self {
            schema_version: GRAPH_SCHEMA_VERSION.to_owned(),
            nodes,
            edges,
        }
    }
}

impl GraphDocument {
    pub fn into_graph(self) -> Result<CausalGraph, GraphError> {
        if self.schema_version != GRAPH_SCHEMA_VERSION {
            return Err(GraphError::UnsupportedVersion(self.schema_version));
        }

        let mut graph = CausalGraph::new();
        for node in self.nodes {
            graph.add_node(&node.id, node.attrs)?;
        }
        for edge in self.edges {
            graph.add_edge(&edge.source, &edge.target, edge.attrs)?;
        }
        Ok(graph)
    }
}

impl CausalGraph {
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument::from(self)
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn from_json(raw: &str) -> Result<Self, GraphError> {
        let document: GraphDocument = serde_json::from_str(raw)?;
        document.into_graph()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), GraphError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}
