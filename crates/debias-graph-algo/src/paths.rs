use std::collections::HashSet;

use debias_core::NodeId;
use petgraph::stable_graph::NodeIndex;

use crate::{CausalGraph, GraphError};

pub type CausalPath = Vec<NodeId>;

struct Branch {
    node: NodeIndex,
    path: Vec<NodeIndex>,
    visited: HashSet<NodeIndex>,
}

impl CausalGraph {
    pub fn find_paths(
        &self,
        source: &str,
        target: &str,
        exclude: &[&str],
    ) -> Result<Vec<CausalPath>, GraphError> {
        let source = self.node_index(source)?;
        let target = self.node_index(target)?;
        if source == target {
            return Ok(Vec::new());
        }

        let excluded: HashSet<NodeIndex> = exclude
            .iter()
            .filter_map(|id| self.index.get(*id).copied())
            .collect();

        let mut paths = Vec::new();
        let mut stack = vec![Branch {
            node: source,
            path: vec![source],
            visited: HashSet::from([source]),
        }];

        while let Some(branch) = stack.pop() {
            if branch.node == target {
                paths.push(
                    branch
                        .path
                        .iter()
                        .map(|idx| self.node_id(*idx).to_owned())
                        .collect(),
                );
                continue;
            }

            // Reverse push keeps lexical order when popping.
            for child in self.sorted_children(branch.node).into_iter().rev() {
                if branch.visited.contains(&child) {
                    continue;
                }
                if child != target && excluded.contains(&child) {
                    continue;
                }

                let mut path = branch.path.clone();
                path.push(child);
                let mut visited = branch.visited.clone();
                visited.insert(child);
                stack.push(Branch {
                    node: child,
                    path,
                    visited,
                });
            }
        }

        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use debias_core::Attributes;

    use crate::{CausalGraph, GraphError};

    fn graph_from(edges: &[(&str, &str)]) -> CausalGraph {
        let mut graph = CausalGraph::new();
        for (source, target) in edges {
            graph
                .add_edge(source, target, Attributes::new())
                .expect("add edge");
        }
        graph
    }

    fn path(nodes: &[&str]) -> Vec<String> {
        nodes.iter().map(|node| (*node).to_owned()).collect()
    }

    #[test]
    fn diamond_yields_both_branches_exactly_once() {
        let graph = graph_from(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")]);

        let paths = graph.find_paths("A", "D", &[]).expect("paths");

        assert_eq!(paths, vec![path(&["A", "B", "D"]), path(&["A", "C", "D"])]);
    }

    #[test]
    fn disconnected_and_identical_endpoints_return_empty() {
        let mut graph = graph_from(&[("A", "B"), ("C", "D")]);
        graph
            .add_node("lonely", Attributes::new())
            .expect("add lonely");

        assert!(graph.find_paths("A", "D", &[]).expect("paths").is_empty());
        assert!(graph.find_paths("B", "A", &[]).expect("paths").is_empty());
        assert!(graph.find_paths("A", "A", &[]).expect("paths").is_empty());
        assert!(
            graph
                .find_paths("lonely", "D", &[])
                .expect("paths")
                .is_empty()
        );
    }

    #[test]
    fn excluded_internal_nodes_prune_paths() {
        let graph = graph_from(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D"), ("A", "D")]);

        let paths = graph.find_paths("A", "D", &["B"]).expect("paths");
        assert_eq!(paths, vec![path(&["A", "C", "D"]), path(&["A", "D"])]);

        let paths = graph.find_paths("A", "D", &["D", "B", "C"]).expect("paths");
        assert_eq!(paths, vec![path(&["A", "D"])]);
    }

    #[test]
    fn layered_reconvergence_enumerates_every_route() {
        // Two stacked diamonds: 2 * 2 distinct routes.
        let graph = graph_from(&[
            ("s", "a1"),
            ("s", "b1"),
            ("a1", "m"),
            ("b1", "m"),
            ("m", "a2"),
            ("m", "b2"),
            ("a2", "t"),
            ("b2", "t"),
        ]);

        let paths = graph.find_paths("s", "t", &[]).expect("paths");
        assert_eq!(paths.len(), 4);
        for found in &paths {
            assert_eq!(found.first().map(String::as_str), Some("s"));
            assert_eq!(found.last().map(String::as_str), Some("t"));
            for pair in found.windows(2) {
                assert!(graph.has_edge(&pair[0], &pair[1]));
            }
        }
    }

    #[test]
    fn unknown_endpoints_fail() {
        let graph = graph_from(&[("A", "B")]);
        assert!(matches!(
            graph.find_paths("A", "nope", &[]),
            Err(GraphError::UnknownNode { .. })
        ));
    }
}
