use std::collections::{BTreeSet, HashMap};

use debias_core::{ColumnKind, Dataset, NodeId, normalize_node_ids};
use debias_graph_algo::CausalGraph;
use serde::{Deserialize, Serialize};

use crate::ModelError;

pub type ParamRef = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    Real,
    Positive,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prior {
    StandardNormal,
    HalfNormal { scale: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub constraint: Constraint,
    pub prior: Prior,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeFamily {
    Gaussian { dispersion: ParamRef },
    Bernoulli,
}

impl OutcomeFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gaussian { .. } => "gaussian",
            Self::Bernoulli => "bernoulli",
        }
    }

    pub fn inverse_link(self, eta: f64) -> f64 {
        match self {
            Self::Gaussian { .. } => eta,
            Self::Bernoulli => sigmoid(eta),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MainEncoding {
    Numeric {
        coefficient: ParamRef,
        mean: f64,
        std_dev: f64,
    },
    Categorical {
        coefficients: Vec<ParamRef>,
        categories: Vec<String>,
    },
}

/// Group-level offsets of a protected attribute attached to a bias node.
/// Offsets are non-centred: `offset[g] = mu + sigma * z[g]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalEffect {
    pub predictor: NodeId,
    pub attribute: NodeId,
    pub mu: ParamRef,
    pub sigma: ParamRef,
    pub raw_offsets: Vec<ParamRef>,
    pub groups: Vec<String>,
}

impl HierarchicalEffect {
    pub fn offset(&self, values: &[f64], group: usize) -> f64 {
        values[self.mu] + values[self.sigma] * values[self.raw_offsets[group]]
    }

    pub fn label(&self) -> String {
        format!("{}|{}", self.predictor, self.attribute)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTerm {
    Intercept { param: ParamRef },
    MainEffect {
        predictor: NodeId,
        encoding: MainEncoding,
    },
    HierarchicalEffect(HierarchicalEffect),
}

impl ModelTerm {
    pub(crate) fn contribution(&self, values: &[f64], input: &TermInput, row: usize) -> f64 {
        match (self, input) {
            (Self::Intercept { param }, _) => values[*param],
            (
                Self::MainEffect {
                    encoding: MainEncoding::Numeric { coefficient, .. },
                    ..
                },
                TermInput::Values(x),
            ) => values[*coefficient] * x[row],
            (
                Self::MainEffect {
                    encoding: MainEncoding::Categorical { coefficients, .. },
                    ..
                },
                TermInput::Levels(levels),
            ) => values[coefficients[levels[row]]],
            (Self::HierarchicalEffect(effect), TermInput::Groups(groups)) => match groups[row] {
                Some(group) => effect.offset(values, group),
                None => values[effect.mu],
            },
            _ => {
                debug_assert!(false, "term input does not match term kind");
                0.0
            }
        }
    }

    pub(crate) fn is_protected_offset(&self, protected: &[NodeId]) -> bool {
        matches!(self, Self::HierarchicalEffect(effect) if protected.contains(&effect.attribute))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TermInput {
    Constant,
    Values(Vec<f64>),
    Levels(Vec<usize>),
    /// `None` marks a group never seen when the model was built.
    Groups(Vec<Option<usize>>),
}

#[derive(Debug, Clone)]
pub(crate) struct TrainingFrame {
    pub(crate) inputs: Vec<TermInput>,
    pub(crate) outcome: Vec<f64>,
}

/// A built, not yet fitted, model. Parameter layout and terms are fixed at
/// build time; the training frame is the encoded copy of the data it was
/// built from.
#[derive(Debug, Clone)]
pub struct HierarchicalModel {
    target: NodeId,
    family: OutcomeFamily,
    parameters: Vec<ParameterSpec>,
    terms: Vec<ModelTerm>,
    bias_nodes: BTreeSet<NodeId>,
    protected_attributes: Vec<NodeId>,
    notes: Vec<String>,
    pub(crate) training: TrainingFrame,
}

impl HierarchicalModel {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn family(&self) -> OutcomeFamily {
        self.family
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn dim(&self) -> usize {
        self.parameters.len()
    }

    pub fn terms(&self) -> &[ModelTerm] {
        &self.terms
    }

    pub fn bias_nodes(&self) -> &BTreeSet<NodeId> {
        &self.bias_nodes
    }

    pub fn protected_attributes(&self) -> &[NodeId] {
        &self.protected_attributes
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn num_observations(&self) -> usize {
        self.training.outcome.len()
    }

    pub fn hierarchical_effects(&self) -> impl Iterator<Item = &HierarchicalEffect> {
        self.terms.iter().filter_map(|term| match term {
            ModelTerm::HierarchicalEffect(effect) => Some(effect),
            _ => None,
        })
    }

    pub fn derived_names(&self) -> Vec<String> {
        self.hierarchical_effects()
            .flat_map(|effect| {
                let label = effect.label();
                effect
                    .groups
                    .iter()
                    .map(move |group| format!("offset[{label}][{group}]"))
            })
            .collect()
    }

    pub fn derived_values(&self, values: &[f64]) -> Vec<f64> {
        self.hierarchical_effects()
            .flat_map(|effect| {
                (0..effect.groups.len()).map(move |group| effect.offset(values, group))
            })
            .collect()
    }

    pub fn constrain(&self, theta: &[f64]) -> Vec<f64> {
        self.parameters
            .iter()
            .zip(theta)
            .map(|(spec, value)| match spec.constraint {
                Constraint::Real => *value,
                Constraint::Positive => value.exp(),
            })
            .collect()
    }

    pub(crate) fn encode(
        &self,
        data: &Dataset,
        skip: impl Fn(&ModelTerm) -> bool,
    ) -> Result<Vec<TermInput>, ModelError> {
        self.terms
            .iter()
            .map(|term| {
                if skip(term) {
                    return Ok(TermInput::Constant);
                }
                encode_term(term, data)
            })
            .collect()
    }
}

fn encode_term(term: &ModelTerm, data: &Dataset) -> Result<TermInput, ModelError> {
    match term {
        ModelTerm::Intercept { .. } => Ok(TermInput::Constant),
        ModelTerm::MainEffect {
            predictor,
            encoding: MainEncoding::Numeric { mean, std_dev, .. },
        } => {
            let kind = column_kind(data, predictor)?;
            if !kind.is_numeric() {
                return Err(ModelError::ColumnKindMismatch {
                    column: predictor.clone(),
                    expected: ColumnKind::Numeric.as_str(),
                    actual: kind.as_str(),
                });
            }
            let values = data
                .numeric_column(predictor)?
                .into_iter()
                .map(|value| (value - mean) / std_dev)
                .collect();
            Ok(TermInput::Values(values))
        }
        ModelTerm::MainEffect {
            predictor,
            encoding: MainEncoding::Categorical { categories, .. },
        } => {
            let kind = column_kind(data, predictor)?;
            if kind != ColumnKind::Categorical {
                return Err(ModelError::ColumnKindMismatch {
                    column: predictor.clone(),
                    expected: ColumnKind::Categorical.as_str(),
                    actual: kind.as_str(),
                });
            }
            let lookup = level_lookup(categories);
            let levels = data
                .labels(predictor)?
                .into_iter()
                .map(|label| {
                    lookup
                        .get(label.as_str())
                        .copied()
                        .ok_or_else(|| ModelError::UnseenCategory {
                            column: predictor.clone(),
                            value: label,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TermInput::Levels(levels))
        }
        ModelTerm::HierarchicalEffect(effect) => {
            column_kind(data, &effect.attribute)?;
            let lookup = level_lookup(&effect.groups);
            let groups = data
                .labels(&effect.attribute)?
                .iter()
                .map(|label| lookup.get(label.as_str()).copied())
                .collect();
            Ok(TermInput::Groups(groups))
        }
    }
}

fn column_kind(data: &Dataset, column: &str) -> Result<ColumnKind, ModelError> {
    data.schema()
        .kind(column)
        .ok_or_else(|| ModelError::MissingColumn {
            column: column.to_owned(),
        })
}

fn level_lookup(labels: &[String]) -> HashMap<&str, usize> {
    labels
        .iter()
        .enumerate()
        .map(|(idx, label)| (label.as_str(), idx))
        .collect()
}

pub(crate) fn sigmoid(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

#[derive(Default)]
struct Layout {
    parameters: Vec<ParameterSpec>,
}

impl Layout {
    fn push(&mut self, name: String, constraint: Constraint, prior: Prior) -> ParamRef {
        self.parameters.push(ParameterSpec {
            name,
            constraint,
            prior,
        });
        self.parameters.len() - 1
    }

    fn real(&mut self, name: String) -> ParamRef {
        self.push(name, Constraint::Real, Prior::StandardNormal)
    }

    fn positive(&mut self, name: String) -> ParamRef {
        self.push(name, Constraint::Positive, Prior::HalfNormal { scale: 1.0 })
    }
}

/// Builds the model for `target`.
///
/// Every parent of the target gets a main effect. A parent that is also a
/// bias node additionally gets one hierarchical block per protected attribute
/// among its own parents, grouped by that attribute's observed labels.
/// Parents with no data column are skipped with a note.
pub fn build<S: AsRef<str>>(
    graph: &CausalGraph,
    data: &Dataset,
    target: &str,
    bias_nodes: &BTreeSet<NodeId>,
    protected_attributes: &[S],
) -> Result<HierarchicalModel, ModelError> {
    let target = target.trim();
    graph.require_node(target)?;
    if let Some(node) = bias_nodes.iter().find(|node| !graph.contains_node(node)) {
        return Err(ModelError::UnknownBiasNode { node: node.clone() });
    }
    let parents = graph.parents(target)?;
    if parents.is_empty() {
        return Err(ModelError::NoParents {
            target: target.to_owned(),
        });
    }

    let family_kind = column_kind(data, target)?;
    if family_kind == ColumnKind::Categorical {
        return Err(ModelError::UnsupportedOutcome {
            target: target.to_owned(),
            kind: family_kind.as_str(),
        });
    }
    if data.is_empty() {
        return Err(ModelError::EmptyDataset);
    }
    let protected = normalize_node_ids(protected_attributes);

    let mut layout = Layout::default();
    let mut terms = vec![ModelTerm::Intercept {
        param: layout.real("intercept".to_owned()),
    }];
    let mut notes = Vec::new();

    for parent in &parents {
        if bias_nodes.contains(parent) {
            let attribute_parents = graph.parents(parent)?;
            for attribute in protected.iter().filter(|a| attribute_parents.contains(*a)) {
                if !data.schema().contains(attribute) {
                    tracing::warn!(
                        predictor = %parent,
                        attribute = %attribute,
                        "protected attribute not observed, hierarchical block skipped"
                    );
                    notes.push(format!(
                        "hierarchical block for '{parent}' skipped: '{attribute}' has no data column"
                    ));
                    continue;
                }
                let groups = data.distinct_labels(attribute)?;
                if groups.is_empty() {
                    return Err(ModelError::EmptyCategories {
                        column: attribute.clone(),
                    });
                }
                let label = format!("{parent}|{attribute}");
                let mu = layout.real(format!("mu[{label}]"));
                let sigma = layout.positive(format!("sigma[{label}]"));
                let raw_offsets = groups
                    .iter()
                    .map(|group| layout.real(format!("z[{label}][{group}]")))
                    .collect();
                tracing::debug!(
                    predictor = %parent,
                    attribute = %attribute,
                    groups = groups.len(),
                    "hierarchical block added"
                );
                terms.push(ModelTerm::HierarchicalEffect(HierarchicalEffect {
                    predictor: parent.clone(),
                    attribute: attribute.clone(),
                    mu,
                    sigma,
                    raw_offsets,
                    groups,
                }));
            }
        }

        let Some(kind) = data.schema().kind(parent) else {
            tracing::warn!(predictor = %parent, "parent has no data column, main effect skipped");
            notes.push(format!("main effect for '{parent}' skipped: no data column"));
            continue;
        };
        let encoding = if kind.is_numeric() {
            let (mean, std_dev) = mean_and_std(&data.numeric_column(parent)?).ok_or_else(|| {
                ModelError::ZeroVariance {
                    column: parent.clone(),
                }
            })?;
            MainEncoding::Numeric {
                coefficient: layout.real(format!("beta[{parent}]")),
                mean,
                std_dev,
            }
        } else {
            let categories = data.distinct_labels(parent)?;
            if categories.is_empty() {
                return Err(ModelError::EmptyCategories {
                    column: parent.clone(),
                });
            }
            let coefficients = categories
                .iter()
                .map(|category| layout.real(format!("beta[{parent}][{category}]")))
                .collect();
            MainEncoding::Categorical {
                coefficients,
                categories,
            }
        };
        terms.push(ModelTerm::MainEffect {
            predictor: parent.clone(),
            encoding,
        });
    }

    if terms.len() == 1 {
        return Err(ModelError::NoObservedParents {
            target: target.to_owned(),
        });
    }

    let family = match family_kind {
        ColumnKind::Binary => OutcomeFamily::Bernoulli,
        _ => OutcomeFamily::Gaussian {
            dispersion: layout.positive("sigma_y".to_owned()),
        },
    };

    let mut model = HierarchicalModel {
        target: target.to_owned(),
        family,
        parameters: layout.parameters,
        terms,
        bias_nodes: bias_nodes.clone(),
        protected_attributes: protected,
        notes,
        training: TrainingFrame {
            inputs: Vec::new(),
            outcome: data.numeric_column(target)?,
        },
    };
    model.training.inputs = model.encode(data, |_| false)?;

    tracing::info!(
        outcome = %model.target,
        family = model.family.as_str(),
        parameters = model.dim(),
        terms = model.terms.len(),
        observations = model.num_observations(),
        "model built"
    );
    Ok(model)
}

fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = var.sqrt();
    (std_dev.is_finite() && std_dev > 0.0).then_some((mean, std_dev))
}

#[cfg(test)]
mod tests {
    use debias_core::{Attributes, Cell, ColumnSpec, Schema};

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

    fn cancer_graph() -> CausalGraph {
        graph_from(&[
            ("ethnicity", "smoking"),
            ("smoking", "cancer"),
            ("cancer", "test_positive"),
            ("ethnicity", "test_positive"),
        ])
    }

    fn cancer_data() -> Dataset {
        let schema = Schema::new(vec![
            ColumnSpec::new("ethnicity", ColumnKind::Categorical),
            ColumnSpec::new("smoking", ColumnKind::Binary),
            ColumnSpec::new("cancer", ColumnKind::Binary),
            ColumnSpec::new("test_positive", ColumnKind::Binary),
        ])
        .expect("schema");
        let rows: Vec<Vec<Cell>> = [
            ("a", 1.0, 1.0, 1.0),
            ("a", 0.0, 0.0, 0.0),
            ("b", 1.0, 0.0, 1.0),
            ("b", 0.0, 1.0, 1.0),
            ("c", 0.0, 0.0, 0.0),
            ("c", 1.0, 1.0, 0.0),
        ]
        .into_iter()
        .map(|(e, s, c, t)| vec![e.into(), s.into(), c.into(), t.into()])
        .collect();
        Dataset::from_rows(schema, rows).expect("data")
    }

    fn bias(nodes: &[&str]) -> BTreeSet<NodeId> {
        nodes.iter().map(|node| (*node).to_owned()).collect()
    }

    #[test]
    fn bias_parent_without_protected_parent_gets_no_offsets() {
        let model = build(
            &cancer_graph(),
            &cancer_data(),
            "test_positive",
            &bias(&["smoking", "cancer"]),
            &["ethnicity"],
        )
        .expect("build");

        assert_eq!(model.family(), OutcomeFamily::Bernoulli);
        let effects: Vec<_> = model.hierarchical_effects().collect();
        assert_eq!(effects.len(), 0, "ethnicity is not a parent of cancer");

        let names: Vec<_> = model.parameters().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "intercept",
                "beta[cancer]",
                "beta[ethnicity][a]",
                "beta[ethnicity][b]",
                "beta[ethnicity][c]",
            ]
        );
    }

    #[test]
    fn mediator_with_protected_parent_gets_offsets() {
        let graph = graph_from(&[("ethnicity", "smoking"), ("smoking", "test_positive")]);
        let model = build(
            &graph,
            &cancer_data(),
            "test_positive",
            &bias(&["smoking"]),
            &["ethnicity"],
        )
        .expect("build");

        let effects: Vec<_> = model.hierarchical_effects().collect();
        assert_eq!(effects.len(), 1);
        let effect = effects[0];
        assert_eq!(effect.predictor, "smoking");
        assert_eq!(effect.attribute, "ethnicity");
        assert_eq!(effect.groups, vec!["a", "b", "c"]);
        assert_eq!(
            model.parameters()[effect.sigma].constraint,
            Constraint::Positive
        );
        assert_eq!(
            model.derived_names(),
            vec![
                "offset[smoking|ethnicity][a]",
                "offset[smoking|ethnicity][b]",
                "offset[smoking|ethnicity][c]",
            ]
        );

        let mut values = vec![0.0; model.dim()];
        values[effect.mu] = 0.5;
        values[effect.sigma] = 2.0;
        values[effect.raw_offsets[1]] = -1.0;
        assert_eq!(model.derived_values(&values), vec![0.5, -1.5, 0.5]);
    }

    #[test]
    fn gaussian_outcome_adds_residual_scale() {
        let graph = graph_from(&[("x", "y")]);
        let schema = Schema::new(vec![
            ColumnSpec::new("x", ColumnKind::Numeric),
            ColumnSpec::new("y", ColumnKind::Numeric),
        ])
        .expect("schema");
        let data = Dataset::from_rows(
            schema,
            vec![
                vec![1.0.into(), 2.0.into()],
                vec![3.0.into(), 4.0.into()],
            ],
        )
        .expect("data");

        let model = build(&graph, &data, "y", &BTreeSet::new(), &[] as &[&str]).expect("build");
        let OutcomeFamily::Gaussian { dispersion } = model.family() else {
            panic!("expected gaussian family");
        };
        assert_eq!(model.parameters()[dispersion].name, "sigma_y");
        assert_eq!(
            model.training.inputs[1],
            TermInput::Values(vec![-1.0 / 2f64.sqrt(), 1.0 / 2f64.sqrt()])
        );
    }

    #[test]
    fn latent_parent_is_skipped_with_note() {
        let graph = graph_from(&[("ethnicity", "test_positive"), ("genes", "test_positive")]);
        let model = build(
            &graph,
            &cancer_data(),
            "test_positive",
            &BTreeSet::new(),
            &["ethnicity"],
        )
        .expect("build");
        assert!(model.notes().iter().any(|note| note.contains("genes")));
        assert_eq!(model.terms().len(), 2);
    }

    #[test]
    fn build_errors() {
        let data = cancer_data();
        let graph = graph_from(&[("ethnicity", "smoking"), ("smoking", "test_positive")]);

        assert!(matches!(
            build(&graph, &data, "ethnicity", &BTreeSet::new(), &["ethnicity"]),
            Err(ModelError::NoParents { .. })
        ));
        assert!(matches!(
            build(&graph, &data, "test_positive", &bias(&["ghost"]), &["ethnicity"]),
            Err(ModelError::UnknownBiasNode { node }) if node == "ghost"
        ));
        let categorical_outcome = graph_from(&[("smoking", "ethnicity")]);
        assert!(matches!(
            build(&categorical_outcome, &data, "ethnicity", &BTreeSet::new(), &["ethnicity"]),
            Err(ModelError::UnsupportedOutcome { .. })
        ));

        let latent_only = graph_from(&[("genes", "test_positive")]);
        assert!(matches!(
            build(&latent_only, &data, "test_positive", &BTreeSet::new(), &["ethnicity"]),
            Err(ModelError::NoObservedParents { .. })
        ));
    }

    #[test]
    fn constant_predictor_is_rejected() {
        let graph = graph_from(&[("x", "y")]);
        let schema = Schema::new(vec![
            ColumnSpec::new("x", ColumnKind::Numeric),
            ColumnSpec::new("y", ColumnKind::Numeric),
        ])
        .expect("schema");
        let data = Dataset::from_rows(
            schema,
            vec![
                vec![1.0.into(), 2.0.into()],
                vec![1.0.into(), 4.0.into()],
            ],
        )
        .expect("data");
        assert!(matches!(
            build(&graph, &data, "y", &BTreeSet::new(), &[] as &[&str]),
            Err(ModelError::ZeroVariance { column }) if column == "x"
        ));
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(-800.0).is_finite());
    }
}
