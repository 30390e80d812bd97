use std::collections::BTreeSet;

use debias_core::{NodeId, normalize_node_ids};

use crate::AnalysisError;
use crate::report::BiasAnalyzer;

impl BiasAnalyzer<'_> {
    pub fn bias_nodes<S: AsRef<str>>(
        &self,
        target: &str,
        protected_attributes: &[S],
    ) -> Result<BTreeSet<NodeId>, AnalysisError> {
        self.graph.require_node(target)?;

        let mut nodes = BTreeSet::new();
        for attribute in normalize_node_ids(protected_attributes) {
            for path in self.graph.find_paths(&attribute, target, &[])? {
                if path.len() > 2 {
                    nodes.extend(path[1..path.len() - 1].iter().cloned());
                }
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use debias_core::Attributes;
    use debias_graph_algo::CausalGraph;

    use super::*;

    fn graph_from(edges: &[(&str, &str)]) -> CausalGraph {
        let mut graph = CausalGraph::new();
        for (source, target) in edges {
            graph
                .add_edge(source, target, Attributes::new())
                .expect("edge");
        }
        graph
    }

    #[test]
    fn single_mediator_is_the_only_bias_node() {
        let graph = graph_from(&[("attr", "mediator"), ("mediator", "target")]);
        let nodes = BiasAnalyzer::new(&graph)
            .bias_nodes("target", &["attr"])
            .expect("bias nodes");
        assert_eq!(nodes, BTreeSet::from(["mediator".to_owned()]));
    }

    #[test]
    fn direct_edge_adds_no_bias_node() {
        let graph = graph_from(&[
            ("attr", "mediator"),
            ("mediator", "target"),
            ("attr", "target"),
        ]);
        let nodes = BiasAnalyzer::new(&graph)
            .bias_nodes("target", &["attr"])
            .expect("bias nodes");
        assert_eq!(nodes, BTreeSet::from(["mediator".to_owned()]));
    }

    #[test]
    fn cancer_scenario_flags_indirect_chain() {
        let graph = graph_from(&[
            ("ethnicity", "smoking"),
            ("smoking", "cancer"),
            ("ethnicity", "testPositive"),
            ("cancer", "testPositive"),
        ]);
        let nodes = BiasAnalyzer::new(&graph)
            .bias_nodes("testPositive", &["ethnicity"])
            .expect("bias nodes");
        assert_eq!(
            nodes,
            BTreeSet::from(["cancer".to_owned(), "smoking".to_owned()])
        );
    }

    #[test]
    fn bias_nodes_need_not_be_direct_parents() {
        let graph = graph_from(&[
            ("gender", "hobby"),
            ("hobby", "job"),
            ("job", "income"),
            ("age", "income"),
        ]);
        let nodes = BiasAnalyzer::new(&graph)
            .bias_nodes("income", &["gender", "age"])
            .expect("bias nodes");
        assert_eq!(
            nodes,
            BTreeSet::from(["hobby".to_owned(), "job".to_owned()])
        );
    }
}
