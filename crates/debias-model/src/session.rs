use std::collections::BTreeSet;

use debias_analysis::BiasAnalyzer;
use debias_core::{Dataset, NodeId};
use debias_graph_algo::CausalGraph;

use crate::ModelError;
use crate::model::{HierarchicalModel, build};
use crate::posterior::{FitOutcome, SamplerOptions, fit};
use crate::predict::{PredictOptions, predict};

#[derive(Debug, Clone)]
pub struct DebiasSession {
    graph: CausalGraph,
    data: Dataset,
    model: Option<HierarchicalModel>,
    fit: Option<FitOutcome>,
}

impl DebiasSession {
    pub fn new(graph: CausalGraph, data: Dataset) -> Self {
        Self {
            graph,
            data,
            model: None,
            fit: None,
        }
    }

    pub fn graph(&self) -> &CausalGraph {
        &self.graph
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    pub fn model(&self) -> Option<&HierarchicalModel> {
        self.model.as_ref()
    }

    pub fn fit_outcome(&self) -> Option<&FitOutcome> {
        self.fit.as_ref()
    }

    pub fn identify_bias_nodes<S: AsRef<str>>(
        &self,
        target: &str,
        protected_attributes: &[S],
    ) -> Result<BTreeSet<NodeId>, ModelError> {
        Ok(BiasAnalyzer::new(&self.graph).bias_nodes(target, protected_attributes)?)
    }

    pub fn build_model<S: AsRef<str>>(
        &mut self,
        target: &str,
        protected_attributes: &[S],
    ) -> Result<&HierarchicalModel, ModelError> {
        let bias_nodes = self.identify_bias_nodes(target, protected_attributes)?;
        self.build_model_with(target, &bias_nodes, protected_attributes)
    }

    pub fn build_model_with<S: AsRef<str>>(
        &mut self,
        target: &str,
        bias_nodes: &BTreeSet<NodeId>,
        protected_attributes: &[S],
    ) -> Result<&HierarchicalModel, ModelError> {
        let model = build(
            &self.graph,
            &self.data,
            target,
            bias_nodes,
            protected_attributes,
        )?;
        self.fit = None;
        Ok(&*self.model.insert(model))
    }

    pub fn fit(&mut self, options: &SamplerOptions) -> Result<&FitOutcome, ModelError> {
        let model = self.model.as_ref().ok_or(ModelError::ModelNotBuilt)?;
        let outcome = fit(model, options)?;
        Ok(&*self.fit.insert(outcome))
    }

    pub fn predict(
        &self,
        new_data: &Dataset,
        target: &str,
        bias_correction: bool,
    ) -> Result<Vec<f64>, ModelError> {
        let (Some(model), Some(fit)) = (&self.model, &self.fit) else {
            return Err(ModelError::ModelNotFitted);
        };
        let options = if bias_correction {
            PredictOptions::corrected(model.protected_attributes())
        } else {
            PredictOptions::uncorrected()
        };
        predict(model, &fit.posterior, new_data, target, &options)
    }

    pub fn predict_with(
        &self,
        new_data: &Dataset,
        target: &str,
        options: &PredictOptions,
    ) -> Result<Vec<f64>, ModelError> {
        let (Some(model), Some(fit)) = (&self.model, &self.fit) else {
            return Err(ModelError::ModelNotFitted);
        };
        predict(model, &fit.posterior, new_data, target, options)
    }
}

#[cfg(test)]
mod tests {
    use debias_core::{Attributes, Cell, ColumnKind, ColumnSpec, Schema};

    use super::*;

    fn session() -> DebiasSession {
        let mut graph = CausalGraph::new();
        for (source, target) in [("group", "mediator"), ("mediator", "y")] {
            graph
                .add_edge(source, target, Attributes::new())
                .expect("edge");
        }
        let schema = Schema::new(vec![
            ColumnSpec::new("group", ColumnKind::Categorical),
            ColumnSpec::new("mediator", ColumnKind::Numeric),
            ColumnSpec::new("y", ColumnKind::Numeric),
        ])
        .expect("schema");
        let rows: Vec<Vec<Cell>> = [
            ("a", 0.2, 1.1),
            ("a", -0.7, 0.3),
            ("b", 1.3, 2.4),
            ("b", 0.4, 1.9),
        ]
        .into_iter()
        .map(|(g, m, y)| vec![g.into(), m.into(), y.into()])
        .collect();
        DebiasSession::new(graph, Dataset::from_rows(schema, rows).expect("data"))
    }

    #[test]
    fn lifecycle_order_is_enforced() {
        let mut session = session();
        let data = session.data().clone();
        assert!(matches!(
            session.fit(&SamplerOptions::default()),
            Err(ModelError::ModelNotBuilt)
        ));
        assert!(matches!(
            session.predict(&data, "y", true),
            Err(ModelError::ModelNotFitted)
        ));

        session.build_model("y", &["group"]).expect("build");
        assert!(matches!(
            session.predict(&data, "y", true),
            Err(ModelError::ModelNotFitted)
        ));

        let options = SamplerOptions {
            samples: 30,
            tune: 30,
            chains: 2,
            ..SamplerOptions::default()
        };
        session.fit(&options).expect("fit");
        let predictions = session.predict(&data, "y", true).expect("predict");
        assert_eq!(predictions.len(), 4);

        session.build_model("y", &["group"]).expect("rebuild");
        assert!(session.fit_outcome().is_none());
    }

    #[test]
    fn bias_nodes_come_back_without_touching_session_state() {
        let session = session();
        let nodes = session
            .identify_bias_nodes("y", &["group"])
            .expect("bias nodes");
        assert_eq!(nodes, BTreeSet::from(["mediator".to_owned()]));
        assert!(session.model().is_none());
    }
}
