use std::collections::{BTreeMap, BTreeSet};

use debias_core::{Dataset, NodeId, normalize_node_ids};
use serde::{Deserialize, Serialize};

use crate::AnalysisError;
use crate::report::BiasAnalyzer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeBiasMetrics {
    pub attribute: NodeId,
    pub total_paths: usize,
    pub mediated_paths: usize,
    pub direct_edge: bool,
    pub mediators: BTreeSet<NodeId>,
    pub group_counts: BTreeMap<String, usize>,
    pub group_means: BTreeMap<String, f64>,
    pub demographic_gap: Option<f64>,
}

impl BiasAnalyzer<'_> {
    pub fn quantify_bias<S: AsRef<str>>(
        &self,
        data: &Dataset,
        target: &str,
        protected_attributes: &[S],
    ) -> Result<Vec<AttributeBiasMetrics>, AnalysisError> {
        self.graph.require_node(target)?;
        if !data.kind(target)?.is_numeric() {
            return Err(AnalysisError::Message(format!(
                "target '{target}' must be numeric or binary to quantify bias"
            )));
        }
        let outcome = data.numeric_column(target)?;

        let mut metrics = Vec::new();
        for attribute in normalize_node_ids(protected_attributes) {
            let paths = self.graph.find_paths(&attribute, target, &[])?;
            let mut mediators = BTreeSet::new();
            let mut mediated_paths = 0;
            for path in &paths {
                if path.len() > 2 {
                    mediated_paths += 1;
                    mediators.extend(path[1..path.len() - 1].iter().cloned());
                }
            }

            let (group_counts, group_means) = if data.schema().contains(&attribute) {
                group_statistics(&data.labels(&attribute)?, &outcome)
            } else {
                tracing::debug!(attribute = %attribute, "protected attribute not observed in data");
                (BTreeMap::new(), BTreeMap::new())
            };
            let demographic_gap = mean_gap(&group_means);

            metrics.push(AttributeBiasMetrics {
                direct_edge: self.graph.has_edge(&attribute, target),
                attribute,
                total_paths: paths.len(),
                mediated_paths,
                mediators,
                group_counts,
                group_means,
                demographic_gap,
            });
        }
        Ok(metrics)
    }
}

fn group_statistics(
    labels: &[String],
    outcome: &[f64],
) -> (BTreeMap<String, usize>, BTreeMap<String, f64>) {
    let mut sums: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for (label, value) in labels.iter().zip(outcome) {
        let entry = sums.entry(label.clone()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += value;
    }

    let counts = sums
        .iter()
        .map(|(label, (count, _))| (label.clone(), *count))
        .collect();
    let means = sums
        .into_iter()
        .map(|(label, (count, sum))| (label, sum / count as f64))
        .collect();
    (counts, means)
}

fn mean_gap(means: &BTreeMap<String, f64>) -> Option<f64> {
    if means.len() < 2 {
        return None;
    }
    let max = means.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = means.values().copied().fold(f64::INFINITY, f64::min);
    Some(max - min)
}

#[cfg(test)]
mod tests {
    use debias_core::{Attributes, ColumnKind, ColumnSpec, Schema};
    use debias_graph_algo::CausalGraph;

    use super::*;

    fn graph() -> CausalGraph {
        let mut graph = CausalGraph::new();
        for (source, target) in [
            ("group", "mediator"),
            ("mediator", "score"),
            ("group", "score"),
            ("latent", "score"),
        ] {
            graph
                .add_edge(source, target, Attributes::new())
                .expect("edge");
        }
        graph
    }

    fn data() -> Dataset {
        let schema = Schema::new(vec![
            ColumnSpec::new("group", ColumnKind::Categorical),
            ColumnSpec::new("score", ColumnKind::Numeric),
        ])
        .expect("schema");
        Dataset::from_rows(
            schema,
            vec![
                vec!["a".into(), 1.0.into()],
                vec!["a".into(), 3.0.into()],
                vec!["b".into(), 6.0.into()],
            ],
        )
        .expect("data")
    }

    #[test]
    fn quantify_counts_paths_and_group_gap() {
        let graph = graph();
        let metrics = BiasAnalyzer::new(&graph)
            .quantify_bias(&data(), "score", &["group", "latent"])
            .expect("quantify");

        let group = &metrics[0];
        assert_eq!(group.attribute, "group");
        assert_eq!(group.total_paths, 2);
        assert_eq!(group.mediated_paths, 1);
        assert!(group.direct_edge);
        assert_eq!(group.mediators, BTreeSet::from(["mediator".to_owned()]));
        assert_eq!(group.group_counts.get("a"), Some(&2));
        assert_eq!(group.group_means.get("a"), Some(&2.0));
        assert_eq!(group.demographic_gap, Some(4.0));

        let latent = &metrics[1];
        assert!(latent.group_means.is_empty());
        assert_eq!(latent.demographic_gap, None);
    }

    #[test]
    fn categorical_target_is_rejected() {
        let graph = graph();
        let err = BiasAnalyzer::new(&graph)
            .quantify_bias(&data(), "group", &["latent"])
            .expect_err("categorical target");
        assert!(matches!(err, AnalysisError::Message(_)));
    }
}
