use std::fmt;

use serde::{Deserialize, Serialize};

use crate::posterior::ChainStats;

/// Autocorrelations are summed up to this lag at most.
const MAX_LAG: usize = 200;

/// Summation stops once the autocorrelation drops below this value.
const AUTOCORRELATION_CUTOFF: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDiagnostics {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    /// Split R-hat; `None` when chains are too short to split.
    pub rhat: Option<f64>,
    pub ess: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConvergenceWarning {
    HighRhat {
        parameter: String,
        rhat: f64,
        threshold: f64,
    },
    LowEss {
        parameter: String,
        ess: f64,
        minimum: f64,
    },
    Divergences {
        chain: usize,
        count: usize,
    },
    /// R-hat from a single chain only compares its two halves.
    SingleChain,
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighRhat {
                parameter,
                rhat,
                threshold,
            } => write!(f, "{parameter}: r-hat {rhat:.3} exceeds {threshold}"),
            Self::LowEss {
                parameter,
                ess,
                minimum,
            } => write!(f, "{parameter}: effective sample size {ess:.1} below {minimum}"),
            Self::Divergences { chain, count } => {
                write!(f, "chain {chain}: {count} divergent transitions")
            }
            Self::SingleChain => write!(f, "only one chain; r-hat is within-chain only"),
        }
    }
}

/// Split potential scale reduction factor over equal-length halves of each
/// chain (Gelman et al., BDA3 §11.4).
pub fn split_rhat(chains: &[Vec<f64>]) -> Option<f64> {
    let half = chains.iter().map(Vec::len).min()? / 2;
    if half < 2 {
        return None;
    }
    let splits: Vec<&[f64]> = chains
        .iter()
        .flat_map(|chain| [&chain[..half], &chain[chain.len() - half..]])
        .collect();

    let n = half as f64;
    let m = splits.len() as f64;
    let moments: Vec<(f64, f64)> = splits.iter().map(|split| mean_and_var(split)).collect();
    let within = moments.iter().map(|(_, var)| var).sum::<f64>() / m;
    let grand_mean = moments.iter().map(|(mean, _)| mean).sum::<f64>() / m;
    let between = n * moments
        .iter()
        .map(|(mean, _)| (mean - grand_mean).powi(2))
        .sum::<f64>()
        / (m - 1.0);

    if within <= 0.0 {
        return Some(if between <= 0.0 { 1.0 } else { f64::INFINITY });
    }
    let pooled = (n - 1.0) / n * within + between / n;
    Some((pooled / within).sqrt())
}

/// Effective sample size summed over chains, each from its initial positive
/// autocorrelation sequence.
pub fn effective_sample_size(chains: &[Vec<f64>]) -> f64 {
    chains.iter().map(|chain| chain_ess(chain)).sum()
}

fn chain_ess(chain: &[f64]) -> f64 {
    let n = chain.len();
    if n < 2 {
        return n as f64;
    }

    let mean = chain.iter().sum::<f64>() / n as f64;
    let var = chain.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    if var < 1e-12 {
        return n as f64;
    }

    let mut sum_rho = 0.0;
    for lag in 1..=MAX_LAG.min(n / 2) {
        let rho = autocorrelation(chain, lag, mean, var);
        if rho < AUTOCORRELATION_CUTOFF {
            break;
        }
        sum_rho += rho;
    }
    n as f64 / (1.0 + 2.0 * sum_rho)
}

fn autocorrelation(chain: &[f64], lag: usize, mean: f64, var: f64) -> f64 {
    let n = chain.len();
    if lag >= n {
        return 0.0;
    }
    let cov = (0..n - lag)
        .map(|i| (chain[i] - mean) * (chain[i + lag] - mean))
        .sum::<f64>()
        / (n - lag) as f64;
    cov / var
}

fn mean_and_var(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

pub(crate) struct DiagnosticThresholds {
    pub(crate) rhat: f64,
    pub(crate) min_ess: f64,
}

/// Per-quantity diagnostics plus the warnings they raise. `columns[q][c]`
/// holds the draws of quantity `q` in chain `c`.
pub(crate) fn diagnose(
    names: &[String],
    columns: &[Vec<Vec<f64>>],
    stats: &[ChainStats],
    thresholds: &DiagnosticThresholds,
) -> (Vec<ParameterDiagnostics>, Vec<ConvergenceWarning>) {
    let mut warnings = Vec::new();
    if stats.len() == 1 {
        warnings.push(ConvergenceWarning::SingleChain);
    }
    for chain in stats.iter().filter(|chain| chain.divergences > 0) {
        warnings.push(ConvergenceWarning::Divergences {
            chain: chain.chain,
            count: chain.divergences,
        });
    }

    let mut diagnostics = Vec::with_capacity(names.len());
    for (name, chains) in names.iter().zip(columns) {
        let pooled: Vec<f64> = chains.iter().flatten().copied().collect();
        let (mean, var) = if pooled.len() >= 2 {
            mean_and_var(&pooled)
        } else {
            (pooled.first().copied().unwrap_or(f64::NAN), 0.0)
        };
        let rhat = split_rhat(chains);
        let ess = effective_sample_size(chains);

        if let Some(rhat) = rhat
            && !(rhat <= thresholds.rhat)
        {
            warnings.push(ConvergenceWarning::HighRhat {
                parameter: name.clone(),
                rhat,
                threshold: thresholds.rhat,
            });
        }
        if ess < thresholds.min_ess {
            warnings.push(ConvergenceWarning::LowEss {
                parameter: name.clone(),
                ess,
                minimum: thresholds.min_ess,
            });
        }
        diagnostics.push(ParameterDiagnostics {
            name: name.clone(),
            mean,
            sd: var.sqrt(),
            rhat,
            ess,
        });
    }
    (diagnostics, warnings)
}
