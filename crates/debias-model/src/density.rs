use crate::model::{
    Constraint, HierarchicalModel, MainEncoding, ModelTerm, OutcomeFamily, Prior, TermInput,
    sigmoid,
};

#[derive(Debug, Clone, Copy)]
pub(crate) struct LogDensity<'m> {
    model: &'m HierarchicalModel,
}

impl<'m> LogDensity<'m> {
    pub(crate) fn new(model: &'m HierarchicalModel) -> Self {
        Self { model }
    }

    pub(crate) fn dim(&self) -> usize {
        self.model.dim()
    }

    pub(crate) fn model(&self) -> &'m HierarchicalModel {
        self.model
    }

    pub(crate) fn evaluate(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
        let model = self.model;
        let values = model.constrain(theta);
        grad.fill(0.0);

        let mut logp = 0.0;
        for (idx, spec) in model.parameters().iter().enumerate() {
            let value = values[idx];
            match (spec.constraint, spec.prior) {
                (Constraint::Real, Prior::StandardNormal) => {
                    logp -= 0.5 * value * value;
                    grad[idx] -= value;
                }
                (Constraint::Positive, Prior::HalfNormal { scale }) => {
                    let ratio = value / scale;
                    logp += theta[idx] - 0.5 * ratio * ratio;
                    grad[idx] += 1.0 - ratio * ratio;
                }
                (Constraint::Positive, Prior::StandardNormal) => {
                    logp += theta[idx] - 0.5 * value * value;
                    grad[idx] += 1.0 - value * value;
                }
                (Constraint::Real, Prior::HalfNormal { scale }) => {
                    let ratio = value / scale;
                    logp -= 0.5 * ratio * ratio;
                    grad[idx] -= value / (scale * scale);
                }
            }
        }

        let frame = &model.training;
        let rows = frame.outcome.len();
        let mut residual_grad = vec![0.0; rows];
        for (row, y) in frame.outcome.iter().enumerate() {
            let eta: f64 = model
                .terms()
                .iter()
                .zip(&frame.inputs)
                .map(|(term, input)| term.contribution(&values, input, row))
                .sum();
            match model.family() {
                OutcomeFamily::Gaussian { dispersion } => {
                    let sigma = values[dispersion];
                    let resid = y - eta;
                    let scaled = resid / sigma;
                    logp += -theta[dispersion] - 0.5 * scaled * scaled;
                    grad[dispersion] += scaled * scaled - 1.0;
                    residual_grad[row] = resid / (sigma * sigma);
                }
                OutcomeFamily::Bernoulli => {
                    logp += y * eta - softplus(eta);
                    residual_grad[row] = y - sigmoid(eta);
                }
            }
        }

        for (term, input) in model.terms().iter().zip(&frame.inputs) {
            accumulate_term_gradient(term, input, &values, &residual_grad, grad);
        }

        if logp.is_finite() && grad.iter().all(|g| g.is_finite()) {
            logp
        } else {
            f64::NEG_INFINITY
        }
    }
}

fn accumulate_term_gradient(
    term: &ModelTerm,
    input: &TermInput,
    values: &[f64],
    residual_grad: &[f64],
    grad: &mut [f64],
) {
    match (term, input) {
        (ModelTerm::Intercept { param }, _) => {
            grad[*param] += residual_grad.iter().sum::<f64>();
        }
        (
            ModelTerm::MainEffect {
                encoding: MainEncoding::Numeric { coefficient, .. },
                ..
            },
            TermInput::Values(x),
        ) => {
            grad[*coefficient] += residual_grad.iter().zip(x).map(|(g, x)| g * x).sum::<f64>();
        }
        (
            ModelTerm::MainEffect {
                encoding: MainEncoding::Categorical { coefficients, .. },
                ..
            },
            TermInput::Levels(levels),
        ) => {
            for (g, level) in residual_grad.iter().zip(levels) {
                grad[coefficients[*level]] += g;
            }
        }
        (ModelTerm::HierarchicalEffect(effect), TermInput::Groups(groups)) => {
            let mut group_sums = vec![0.0; effect.groups.len()];
            for (g, group) in residual_grad.iter().zip(groups) {
                match group {
                    Some(group) => group_sums[*group] += g,
                    None => grad[effect.mu] += g,
                }
            }
            let sigma = values[effect.sigma];
            for (group, sum) in group_sums.iter().enumerate() {
                let raw = effect.raw_offsets[group];
                grad[effect.mu] += sum;
                grad[raw] += sigma * sum;
                // d sigma / d log sigma = sigma
                grad[effect.sigma] += sum * values[raw] * sigma;
            }
        }
        _ => {}
    }
}

fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}
