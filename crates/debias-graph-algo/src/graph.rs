use std::collections::{BTreeSet, HashMap};

use debias_core::{Attributes, NodeId, is_protected};
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde_json::Value;

use crate::GraphError;

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub(crate) id: NodeId,
    pub(crate) attrs: Attributes,
}

/// Directed acyclic graph of causal assumptions.
///
/// Acyclicity is enforced eagerly: an insertion that would close a cycle is
/// rejected before anything is written, so a failed `add_edge` leaves the
/// graph exactly as it was.
#[derive(Debug, Clone, Default)]
pub struct CausalGraph {
    pub(crate) graph: StableDiGraph<NodeData, Attributes>,
    pub(crate) index: HashMap<NodeId, NodeIndex>,
}

impl CausalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str, attrs: Attributes) -> Result<(), GraphError> {
        let id = validate_id(id)?;
        if let Some(&idx) = self.index.get(&id) {
            self.graph[idx].attrs.extend(attrs);
            return Ok(());
        }

        tracing::debug!(node = %id, "adding causal node");
        let idx = self.graph.add_node(NodeData {
            id: id.clone(),
            attrs,
        });
        self.index.insert(id, idx);
        Ok(())
    }

    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        attrs: Attributes,
    ) -> Result<(), GraphError> {
        let source = validate_id(source)?;
        let target = validate_id(target)?;
        if source == target {
            return Err(GraphError::SelfLoop { node: source });
        }

        if let (Some(&src), Some(&dst)) = (self.index.get(&source), self.index.get(&target)) {
            if let Some(edge) = self.graph.find_edge(src, dst) {
                self.graph[edge] = attrs;
                return Ok(());
            }
            if has_path_connecting(&self.graph, dst, src, None) {
                return Err(GraphError::Cycle {
                    from: source,
                    to: target,
                });
            }
        }

        let src = self.ensure_node(&source);
        let dst = self.ensure_node(&target);
        tracing::debug!(from = %source, to = %target, "adding causal edge");
        self.graph.add_edge(src, dst, attrs);
        Ok(())
    }

    pub fn remove_edge(&mut self, source: &str, target: &str) -> Result<Attributes, GraphError> {
        let src = self.node_index(source)?;
        let dst = self.node_index(target)?;
        let Some(edge) = self.graph.find_edge(src, dst) else {
            return Err(GraphError::MissingEdge {
                from: source.to_owned(),
                to: target.to_owned(),
            });
        };
        tracing::debug!(from = source, to = target, "removing causal edge");
        Ok(self.graph.remove_edge(edge).unwrap_or_default())
    }

    pub fn remove_node(&mut self, id: &str) -> Result<Attributes, GraphError> {
        let idx = self.node_index(id)?;
        let removed = self.graph.remove_node(idx);
        let Some(data) = removed else {
            return Err(GraphError::UnknownNode {
                node: id.to_owned(),
            });
        };
        self.index.remove(&data.id);
        tracing::debug!(node = %data.id, "removed causal node");
        Ok(data.attrs)
    }

    pub fn set_node_attr(&mut self, id: &str, key: &str, value: Value) -> Result<(), GraphError> {
        let idx = self.node_index(id)?;
        self.graph[idx].attrs.insert(key.to_owned(), value);
        Ok(())
    }

    pub fn parents(&self, id: &str) -> Result<BTreeSet<NodeId>, GraphError> {
        let idx = self.node_index(id)?;
        Ok(self.neighbor_ids(idx, Direction::Incoming))
    }

    pub fn children(&self, id: &str) -> Result<BTreeSet<NodeId>, GraphError> {
        let idx = self.node_index(id)?;
        Ok(self.neighbor_ids(idx, Direction::Outgoing))
    }

    pub fn node_attrs(&self, id: &str) -> Result<&Attributes, GraphError> {
        let idx = self.node_index(id)?;
        Ok(&self.graph[idx].attrs)
    }

    pub fn edge_attrs(&self, source: &str, target: &str) -> Result<&Attributes, GraphError> {
        let src = self.node_index(source)?;
        let dst = self.node_index(target)?;
        self.graph
            .find_edge(src, dst)
            .map(|edge| &self.graph[edge])
            .ok_or_else(|| GraphError::MissingEdge {
                from: source.to_owned(),
                to: target.to_owned(),
            })
    }

    pub fn require_node(&self, id: &str) -> Result<(), GraphError> {
        self.node_index(id).map(|_| ())
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        match (self.index.get(source), self.index.get(target)) {
            (Some(&src), Some(&dst)) => self.graph.find_edge(src, dst).is_some(),
            _ => false,
        }
    }

    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.index.keys().cloned().collect()
    }

    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges: Vec<(NodeId, NodeId)> = self
            .graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].id.clone(),
                    self.graph[edge.target()].id.clone(),
                )
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn protected_nodes(&self) -> BTreeSet<NodeId> {
        self.graph
            .node_indices()
            .map(|idx| &self.graph[idx])
            .filter(|data| is_protected(&data.attrs))
            .map(|data| data.id.clone())
            .collect()
    }

    pub(crate) fn node_index(&self, id: &str) -> Result<NodeIndex, GraphError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode {
                node: id.to_owned(),
            })
    }

    pub(crate) fn node_id(&self, idx: NodeIndex) -> &str {
        &self.graph[idx].id
    }

    pub(crate) fn sorted_children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut children: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        children.sort_by(|left, right| self.node_id(*left).cmp(self.node_id(*right)));
        children.dedup();
        children
    }

    fn neighbor_ids(&self, idx: NodeIndex, direction: Direction) -> BTreeSet<NodeId> {
        self.graph
            .neighbors_directed(idx, direction)
            .map(|neighbor| self.graph[neighbor].id.clone())
            .collect()
    }

    fn ensure_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(NodeData {
            id: id.to_owned(),
            attrs: Attributes::new(),
        });
        self.index.insert(id.to_owned(), idx);
        idx
    }
}

fn validate_id(id: &str) -> Result<NodeId, GraphError> {
    if id.trim().is_empty() {
        return Err(GraphError::EmptyNodeId);
    }
    if id.trim() != id {
        return Err(GraphError::PaddedNodeId { node: id.to_owned() });
    }
    Ok(id.to_owned())
}
