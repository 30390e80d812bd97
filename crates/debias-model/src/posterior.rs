use debias_config::{
    DEFAULT_CHAINS, DEFAULT_MAX_LEAPFROG_STEPS, DEFAULT_MIN_ESS, DEFAULT_RHAT_THRESHOLD,
    DEFAULT_SAMPLES, DEFAULT_SEED, DEFAULT_TARGET_ACCEPT, DEFAULT_TUNE, SamplerConfig,
};
use debias_core::NodeId;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ModelError;
use crate::density::LogDensity;
use crate::diagnostics::{
    ConvergenceWarning, DiagnosticThresholds, ParameterDiagnostics, diagnose,
};
use crate::model::HierarchicalModel;
use crate::sampler::run_chain;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerOptions {
    pub samples: usize,
    pub tune: usize,
    pub target_accept: f64,
    pub chains: usize,
    pub seed: u64,
    pub max_leapfrog_steps: usize,
    pub rhat_threshold: f64,
    pub min_ess: f64,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLES,
            tune: DEFAULT_TUNE,
            target_accept: DEFAULT_TARGET_ACCEPT,
            chains: DEFAULT_CHAINS,
            seed: DEFAULT_SEED,
            max_leapfrog_steps: DEFAULT_MAX_LEAPFROG_STEPS,
            rhat_threshold: DEFAULT_RHAT_THRESHOLD,
            min_ess: DEFAULT_MIN_ESS,
        }
    }
}

impl From<&SamplerConfig> for SamplerOptions {
    fn from(config: &SamplerConfig) -> Self {
        Self {
            samples: config.samples,
            tune: config.tune,
            target_accept: config.target_accept,
            chains: config.chains,
            seed: config.seed,
            max_leapfrog_steps: config.max_leapfrog_steps,
            rhat_threshold: config.rhat_threshold,
            min_ess: config.min_ess,
        }
    }
}

impl SamplerOptions {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.samples == 0 {
            return Err(ModelError::InvalidOptions(
                "samples must be at least 1".to_owned(),
            ));
        }
        if self.chains == 0 {
            return Err(ModelError::InvalidOptions(
                "chains must be at least 1".to_owned(),
            ));
        }
        if self.max_leapfrog_steps == 0 {
            return Err(ModelError::InvalidOptions(
                "max_leapfrog_steps must be at least 1".to_owned(),
            ));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(ModelError::InvalidOptions(format!(
                "target_accept must lie in (0, 1), got {}",
                self.target_accept
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {
    pub chain: usize,
    pub step_size: f64,
    pub mean_accept_prob: f64,
    pub mean_leapfrog_steps: f64,
    pub divergences: usize,
}

/// Retained draws of every chain. Each draw holds the constrained model
/// parameters followed by the derived group offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSample {
    target: NodeId,
    names: Vec<String>,
    parameter_count: usize,
    chains: Vec<Vec<Vec<f64>>>,
    stats: Vec<ChainStats>,
}

impl PosteriorSample {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn num_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn num_draws(&self) -> usize {
        self.chains.first().map_or(0, Vec::len)
    }

    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_draws() == 0
    }

    pub fn chain_stats(&self) -> &[ChainStats] {
        &self.stats
    }

    pub fn iter_draws(&self) -> impl Iterator<Item = &[f64]> {
        self.chains.iter().flatten().map(Vec::as_slice)
    }

    pub fn draws(&self, name: &str) -> Option<Vec<f64>> {
        let column = self.column(name)?;
        Some(self.iter_draws().map(|draw| draw[column]).collect())
    }

    pub fn chain_draws(&self, name: &str) -> Option<Vec<Vec<f64>>> {
        let column = self.column(name)?;
        Some(
            self.chains
                .iter()
                .map(|chain| chain.iter().map(|draw| draw[column]).collect())
                .collect(),
        )
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        let draws = self.draws(name)?;
        if draws.is_empty() {
            return None;
        }
        Some(draws.iter().sum::<f64>() / draws.len() as f64)
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    pub posterior: PosteriorSample,
    pub diagnostics: Vec<ParameterDiagnostics>,
    pub warnings: Vec<ConvergenceWarning>,
}

/// Samples the posterior of `model`. Chains run in parallel; each is seeded
/// from `options.seed` and its index, so the same seed gives the same draws.
/// Convergence problems come back as warnings, never as errors.
pub fn fit(model: &HierarchicalModel, options: &SamplerOptions) -> Result<FitOutcome, ModelError> {
    options.validate()?;
    let density = LogDensity::new(model);

    tracing::info!(
        outcome = %model.target(),
        chains = options.chains,
        samples = options.samples,
        tune = options.tune,
        seed = options.seed,
        "sampling posterior"
    );
    let results = (0..options.chains)
        .into_par_iter()
        .map(|chain| run_chain(density, options, chain))
        .collect::<Result<Vec<_>, _>>()?;

    let mut names: Vec<String> = model.parameters().iter().map(|p| p.name.clone()).collect();
    names.extend(model.derived_names());

    let (chains, stats): (Vec<_>, Vec<_>) = results
        .into_iter()
        .map(|result| (result.draws, result.stats))
        .unzip();

    let columns: Vec<Vec<Vec<f64>>> = (0..names.len())
        .map(|column| {
            chains
                .iter()
                .map(|chain| chain.iter().map(|draw| draw[column]).collect())
                .collect()
        })
        .collect();
    let (diagnostics, warnings) = diagnose(
        &names,
        &columns,
        &stats,
        &DiagnosticThresholds {
            rhat: options.rhat_threshold,
            min_ess: options.min_ess,
        },
    );
    for warning in &warnings {
        tracing::warn!(outcome = %model.target(), warning = %warning, "convergence warning");
    }

    Ok(FitOutcome {
        posterior: PosteriorSample {
            target: model.target().to_owned(),
            names,
            parameter_count: model.dim(),
            chains,
            stats,
        },
        diagnostics,
        warnings,
    })
}
