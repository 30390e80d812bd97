use debias_config::{DEFAULT_BIAS_CORRECTION, PredictionConfig};
use debias_core::{Dataset, NodeId, normalize_node_ids};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ModelError;
use crate::model::{HierarchicalModel, ModelTerm};
use crate::posterior::PosteriorSample;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictOptions {
    /// Drop the group offsets of `protected_attributes`.
    pub bias_correction: bool,
    /// Empty means the model's own protected attributes.
    #[serde(default)]
    pub protected_attributes: Vec<NodeId>,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            bias_correction: DEFAULT_BIAS_CORRECTION,
            protected_attributes: Vec::new(),
        }
    }
}

impl From<&PredictionConfig> for PredictOptions {
    fn from(config: &PredictionConfig) -> Self {
        Self {
            bias_correction: config.bias_correction,
            ..Self::default()
        }
    }
}

impl PredictOptions {
    pub fn corrected<S: AsRef<str>>(protected_attributes: &[S]) -> Self {
        Self {
            bias_correction: true,
            protected_attributes: normalize_node_ids(protected_attributes),
        }
    }

    pub fn uncorrected() -> Self {
        Self {
            bias_correction: false,
            protected_attributes: Vec::new(),
        }
    }

    fn omits(&self, term: &ModelTerm, model: &HierarchicalModel) -> bool {
        let protected = if self.protected_attributes.is_empty() {
            model.protected_attributes()
        } else {
            self.protected_attributes.as_slice()
        };
        self.bias_correction && term.is_protected_offset(protected)
    }
}

/// Posterior mean prediction per row of `data`, on the outcome scale
/// (probabilities for binary outcomes).
///
/// Predictors are standardized with the training statistics. A group never
/// seen in training falls back to the block's population mean `mu`.
pub fn predict(
    model: &HierarchicalModel,
    posterior: &PosteriorSample,
    data: &Dataset,
    target: &str,
    options: &PredictOptions,
) -> Result<Vec<f64>, ModelError> {
    let per_draw = predict_draws(model, posterior, data, target, options)?;
    let draws = per_draw.len() as f64;
    let mut means = vec![0.0; data.len()];
    for draw in &per_draw {
        for (mean, value) in means.iter_mut().zip(draw) {
            *mean += value;
        }
    }
    for (row, mean) in means.iter_mut().enumerate() {
        *mean /= draws;
        if !mean.is_finite() {
            return Err(ModelError::NonFinitePrediction { row });
        }
    }
    Ok(means)
}

/// Predictions for every posterior draw, `[draw][row]`, chain after chain.
pub fn predict_draws(
    model: &HierarchicalModel,
    posterior: &PosteriorSample,
    data: &Dataset,
    target: &str,
    options: &PredictOptions,
) -> Result<Vec<Vec<f64>>, ModelError> {
    let target = target.trim();
    if target != model.target() {
        return Err(ModelError::TargetMismatch {
            expected: model.target().to_owned(),
            actual: target.to_owned(),
        });
    }
    if posterior.is_empty() {
        return Err(ModelError::ModelNotFitted);
    }
    if posterior.target() != model.target() || posterior.parameter_count() != model.dim() {
        return Err(ModelError::PosteriorMismatch(format!(
            "posterior has {} parameters for '{}', model has {} for '{}'",
            posterior.parameter_count(),
            posterior.target(),
            model.dim(),
            model.target()
        )));
    }
    if let Some((fitted, expected)) = posterior
        .names()
        .iter()
        .zip(model.parameters())
        .find(|(fitted, spec)| **fitted != spec.name)
    {
        return Err(ModelError::PosteriorMismatch(format!(
            "posterior parameter '{fitted}' does not match model parameter '{}'",
            expected.name
        )));
    }

    let inputs = model.encode(data, |term| options.omits(term, model))?;
    let terms: Vec<_> = model
        .terms()
        .iter()
        .zip(&inputs)
        .filter(|(term, _)| !options.omits(term, model))
        .collect();
    let omitted = model.terms().len() - terms.len();
    if omitted > 0 {
        tracing::debug!(omitted, "protected group offsets dropped from prediction");
    }

    let family = model.family();
    let draws: Vec<&[f64]> = posterior.iter_draws().collect();
    let per_draw: Vec<Vec<f64>> = draws
        .par_iter()
        .map(|values| {
            (0..data.len())
                .map(|row| {
                    let eta: f64 = terms
                        .iter()
                        .map(|(term, input)| term.contribution(values, input, row))
                        .sum();
                    family.inverse_link(eta)
                })
                .collect()
        })
        .collect();

    for draw in &per_draw {
        if let Some(row) = draw.iter().position(|value| !value.is_finite()) {
            return Err(ModelError::NonFinitePrediction { row });
        }
    }
    Ok(per_draw)
}
