use std::collections::BTreeSet;

use debias_core::{NodeId, normalize_node_ids};
use debias_graph_algo::CausalPath;
use serde::{Deserialize, Serialize};

use crate::AnalysisError;
use crate::report::{BiasAnalyzer, adjustment_from_records};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackdoorPathRecord {
    pub protected_attribute: NodeId,
    pub paths_to_outcome: Vec<CausalPath>,
    pub paths_to_treatment: Vec<CausalPath>,
}

impl BiasAnalyzer<'_> {
    pub fn backdoor_paths<S: AsRef<str>>(
        &self,
        treatment: &str,
        outcome: &str,
        protected_attributes: &[S],
    ) -> Result<Vec<BackdoorPathRecord>, AnalysisError> {
        self.graph.require_node(treatment)?;
        self.graph.require_node(outcome)?;

        let mut records = Vec::new();
        for attribute in normalize_node_ids(protected_attributes) {
            let paths_to_outcome = self.graph.find_paths(&attribute, outcome, &[])?;
            let paths_to_treatment = self.graph.find_paths(&attribute, treatment, &[])?;
            if paths_to_outcome.is_empty() || paths_to_treatment.is_empty() {
                continue;
            }

            tracing::debug!(
                attribute = %attribute,
                to_outcome = paths_to_outcome.len(),
                to_treatment = paths_to_treatment.len(),
                "backdoor dependence through protected attribute"
            );
            records.push(BackdoorPathRecord {
                protected_attribute: attribute,
                paths_to_outcome,
                paths_to_treatment,
            });
        }
        Ok(records)
    }

    pub fn minimal_adjustment_set<S: AsRef<str>>(
        &self,
        treatment: &str,
        outcome: &str,
        protected_attributes: &[S],
    ) -> Result<BTreeSet<NodeId>, AnalysisError> {
        let records = self.backdoor_paths(treatment, outcome, protected_attributes)?;
        Ok(adjustment_from_records(
            &records,
            treatment.trim(),
            outcome.trim(),
        ))
    }
}
