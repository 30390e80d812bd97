use std::collections::BTreeSet;

use debias_core::{Dataset, NodeId, normalize_node_ids};
use debias_graph_algo::CausalGraph;
use serde::{Deserialize, Serialize};

use crate::AnalysisError;
use crate::backdoor::BackdoorPathRecord;
use crate::quantify::AttributeBiasMetrics;

pub const BIAS_REPORT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BiasReportRequest {
    pub target: String,
    pub treatment: Option<String>,
    #[serde(default)]
    pub protected_attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasReport {
    pub schema_version: String,
    pub target: NodeId,
    pub treatment: Option<NodeId>,
    pub protected_attributes: Vec<NodeId>,
    pub bias_nodes: BTreeSet<NodeId>,
    pub backdoor_paths: Vec<BackdoorPathRecord>,
    pub adjustment_set: BTreeSet<NodeId>,
    pub quantification: Vec<AttributeBiasMetrics>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct BiasAnalyzer<'g> {
    pub(crate) graph: &'g CausalGraph,
}

impl<'g> BiasAnalyzer<'g> {
    pub fn new(graph: &'g CausalGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &'g CausalGraph {
        self.graph
    }

    pub fn report(
        &self,
        request: BiasReportRequest,
        data: Option<&Dataset>,
    ) -> Result<BiasReport, AnalysisError> {
        let target = request.target.trim();
        if target.is_empty() {
            return Err(AnalysisError::Message(
                "target is required for a bias report".to_owned(),
            ));
        }
        self.graph.require_node(target)?;

        let mut notes = Vec::new();
        let mut protected = normalize_node_ids(&request.protected_attributes);
        if protected.is_empty() {
            protected = self.graph.protected_nodes().into_iter().collect();
            if protected.is_empty() {
                notes.push("no protected attributes declared or flagged in graph".to_owned());
            }
        }

        let bias_nodes = self.bias_nodes(target, &protected)?;
        if bias_nodes.is_empty() && !protected.is_empty() {
            notes.push(format!(
                "no mediated path from a protected attribute reaches '{target}'"
            ));
        }

        let treatment = request
            .treatment
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);

        let (backdoor_paths, adjustment_set) = match treatment.as_deref() {
            Some(treatment) => {
                let records = self.backdoor_paths(treatment, target, &protected)?;
                let adjustment = adjustment_from_records(&records, treatment, target);
                (records, adjustment)
            }
            None => {
                notes.push("no treatment given; backdoor analysis skipped".to_owned());
                (Vec::new(), BTreeSet::new())
            }
        };

        let quantification = match data {
            Some(data) => self.quantify_bias(data, target, &protected)?,
            None => {
                notes.push("no dataset given; group disparities not quantified".to_owned());
                Vec::new()
            }
        };

        tracing::info!(
            outcome = %target,
            bias_nodes = bias_nodes.len(),
            backdoor_records = backdoor_paths.len(),
            "bias report assembled"
        );

        Ok(BiasReport {
            schema_version: BIAS_REPORT_SCHEMA_VERSION.to_owned(),
            target: target.to_owned(),
            treatment,
            protected_attributes: protected,
            bias_nodes,
            backdoor_paths,
            adjustment_set,
            quantification,
            notes,
        })
    }
}

pub(crate) fn adjustment_from_records(
    records: &[BackdoorPathRecord],
    treatment: &str,
    outcome: &str,
) -> BTreeSet<NodeId> {
    let mut candidates = BTreeSet::new();
    for record in records {
        for path in record
            .paths_to_outcome
            .iter()
            .chain(record.paths_to_treatment.iter())
        {
            if path.len() > 2 {
                candidates.extend(path[1..path.len() - 1].iter().cloned());
            }
        }
    }
    candidates.remove(treatment);
    candidates.remove(outcome);
    candidates
}
