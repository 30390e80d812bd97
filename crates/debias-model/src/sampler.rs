//! Hamiltonian Monte Carlo with a diagonal mass matrix.
//!
//! Warm-up adapts the step size by dual averaging toward the target
//! acceptance probability and estimates the diagonal metric from the middle
//! part of warm-up. Warm-up draws are discarded.

use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::ModelError;
use crate::density::LogDensity;
use crate::posterior::{ChainStats, SamplerOptions};

/// Energy error above which a trajectory counts as divergent.
const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// Nominal trajectory length in metric-scaled units.
const INTEGRATION_TIME: f64 = 1.5;

/// Initial values are drawn uniformly from `[-INIT_RADIUS, INIT_RADIUS]`.
const INIT_RADIUS: f64 = 1.0;

const MAX_INIT_ATTEMPTS: usize = 100;

#[derive(Debug, Clone)]
struct Point {
    theta: Vec<f64>,
    grad: Vec<f64>,
    logp: f64,
}

struct Transition {
    point: Point,
    accept_prob: f64,
    divergent: bool,
    steps: usize,
}

pub(crate) struct ChainDraws {
    /// Constrained parameters followed by derived offsets, one row per draw.
    pub(crate) draws: Vec<Vec<f64>>,
    pub(crate) stats: ChainStats,
}

/// Nesterov dual averaging of the log step size (Hoffman & Gelman 2014).
struct DualAveraging {
    target: f64,
    mu: f64,
    log_step: f64,
    log_step_bar: f64,
    h_bar: f64,
    count: usize,
}

impl DualAveraging {
    const GAMMA: f64 = 0.05;
    const T0: f64 = 10.0;
    const KAPPA: f64 = 0.75;

    fn new(step: f64, target: f64) -> Self {
        Self {
            target,
            mu: (10.0 * step).ln(),
            log_step: step.ln(),
            log_step_bar: 0.0,
            h_bar: 0.0,
            count: 0,
        }
    }

    fn update(&mut self, accept_prob: f64) -> f64 {
        self.count += 1;
        let t = self.count as f64;
        let weight = 1.0 / (t + Self::T0);
        self.h_bar = (1.0 - weight) * self.h_bar + weight * (self.target - accept_prob);
        self.log_step = self.mu - t.sqrt() / Self::GAMMA * self.h_bar;
        let eta = t.powf(-Self::KAPPA);
        self.log_step_bar = eta * self.log_step + (1.0 - eta) * self.log_step_bar;
        self.log_step.exp()
    }

    fn final_step(&self) -> f64 {
        if self.count == 0 {
            self.log_step.exp()
        } else {
            self.log_step_bar.exp()
        }
    }
}

/// Welford accumulator for the per-coordinate variance of warm-up draws.
struct RunningVariance {
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningVariance {
    fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    fn push(&mut self, values: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for (idx, value) in values.iter().enumerate() {
            let delta = value - self.mean[idx];
            self.mean[idx] += delta / n;
            self.m2[idx] += delta * (value - self.mean[idx]);
        }
    }

    /// Sample variance shrunk toward a small constant, as Stan does.
    fn regularized(&self) -> Vec<f64> {
        let n = self.count as f64;
        self.m2
            .iter()
            .map(|m2| {
                let var = m2 / (n - 1.0);
                (n / (n + 5.0)) * var + 1e-3 * (5.0 / (n + 5.0))
            })
            .collect()
    }
}

struct Hmc<'d> {
    density: LogDensity<'d>,
    inv_metric: Vec<f64>,
    max_steps: usize,
}

impl Hmc<'_> {
    fn kinetic(&self, momentum: &[f64]) -> f64 {
        0.5 * momentum
            .iter()
            .zip(&self.inv_metric)
            .map(|(p, m)| p * p * m)
            .sum::<f64>()
    }

    fn sample_momentum(&self, rng: &mut Xoshiro256PlusPlus) -> Vec<f64> {
        self.inv_metric
            .iter()
            .map(|m| {
                let z: f64 = rng.sample(StandardNormal);
                z / m.sqrt()
            })
            .collect()
    }

    fn leapfrog(
        &self,
        start: &Point,
        momentum: &mut [f64],
        step: f64,
        steps: usize,
    ) -> Option<Point> {
        let mut theta = start.theta.clone();
        let mut grad = start.grad.clone();
        let mut logp = start.logp;
        for _ in 0..steps {
            for (p, g) in momentum.iter_mut().zip(&grad) {
                *p += 0.5 * step * g;
            }
            for ((x, p), m) in theta.iter_mut().zip(momentum.iter()).zip(&self.inv_metric) {
                *x += step * m * p;
            }
            logp = self.density.evaluate(&theta, &mut grad);
            if !logp.is_finite() {
                return None;
            }
            for (p, g) in momentum.iter_mut().zip(&grad) {
                *p += 0.5 * step * g;
            }
        }
        Some(Point { theta, grad, logp })
    }

    fn transition(&self, current: &Point, step: f64, rng: &mut Xoshiro256PlusPlus) -> Transition {
        let mut momentum = self.sample_momentum(rng);
        let initial_energy = -current.logp + self.kinetic(&momentum);
        let steps = ((INTEGRATION_TIME / step).ceil() as usize).clamp(1, self.max_steps);
        let jittered = step * rng.random_range(0.9..1.1);

        let rejected = |divergent| Transition {
            point: current.clone(),
            accept_prob: 0.0,
            divergent,
            steps,
        };
        let Some(proposal) = self.leapfrog(current, &mut momentum, jittered, steps) else {
            return rejected(true);
        };
        let energy_error = -proposal.logp + self.kinetic(&momentum) - initial_energy;
        if !energy_error.is_finite() || energy_error > DIVERGENCE_THRESHOLD {
            return rejected(true);
        }

        let accept_prob = (-energy_error).exp().min(1.0);
        if rng.random::<f64>() < accept_prob {
            Transition {
                point: proposal,
                accept_prob,
                divergent: false,
                steps,
            }
        } else {
            Transition {
                accept_prob,
                ..rejected(false)
            }
        }
    }

    /// Doubles or halves the step size until a single leapfrog step crosses
    /// an acceptance probability of one half.
    fn reasonable_step(&self, point: &Point, rng: &mut Xoshiro256PlusPlus) -> f64 {
        let log_accept = |step: f64, rng: &mut Xoshiro256PlusPlus| {
            let mut momentum = self.sample_momentum(rng);
            let initial_energy = -point.logp + self.kinetic(&momentum);
            match self.leapfrog(point, &mut momentum, step, 1) {
                Some(proposal) => {
                    let log_ratio = initial_energy - (-proposal.logp + self.kinetic(&momentum));
                    if log_ratio.is_finite() {
                        log_ratio
                    } else {
                        f64::NEG_INFINITY
                    }
                }
                None => f64::NEG_INFINITY,
            }
        };

        let ln2 = std::f64::consts::LN_2;
        let mut step = 1.0;
        let mut log_a = log_accept(step, rng);
        let direction = if log_a > -ln2 { 1.0 } else { -1.0 };
        for _ in 0..50 {
            if direction * (log_a + ln2) <= 0.0 {
                break;
            }
            let next = step * 2f64.powf(direction);
            if !(1e-8..=1e3).contains(&next) {
                break;
            }
            step = next;
            log_a = log_accept(step, rng);
        }
        step
    }
}

fn initial_point(density: &LogDensity<'_>, rng: &mut Xoshiro256PlusPlus) -> Option<Point> {
    let dim = density.dim();
    let mut grad = vec![0.0; dim];
    for _ in 0..MAX_INIT_ATTEMPTS {
        let theta: Vec<f64> = (0..dim)
            .map(|_| rng.random_range(-INIT_RADIUS..INIT_RADIUS))
            .collect();
        let logp = density.evaluate(&theta, &mut grad);
        if logp.is_finite() {
            return Some(Point { theta, grad, logp });
        }
    }
    let theta = vec![0.0; dim];
    let logp = density.evaluate(&theta, &mut grad);
    logp.is_finite().then_some(Point { theta, grad, logp })
}

/// Runs one chain. The chain's generator is seeded from `options.seed` and
/// the chain index, so a fixed seed reproduces the chain exactly.
pub(crate) fn run_chain(
    density: LogDensity<'_>,
    options: &SamplerOptions,
    chain: usize,
) -> Result<ChainDraws, ModelError> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(options.seed.wrapping_add(chain as u64));
    let model = density.model();
    let mut point =
        initial_point(&density, &mut rng).ok_or(ModelError::InitializationFailed { chain })?;

    let mut hmc = Hmc {
        density,
        inv_metric: vec![1.0; density.dim()],
        max_steps: options.max_leapfrog_steps,
    };
    let mut step = hmc.reasonable_step(&point, &mut rng);
    let mut adaptation = DualAveraging::new(step, options.target_accept);

    let (window_start, window_end) = if options.tune >= 20 {
        (options.tune * 15 / 100, options.tune * 85 / 100)
    } else {
        (options.tune, options.tune)
    };
    let mut variance = RunningVariance::new(density.dim());

    for iteration in 0..options.tune {
        let transition = hmc.transition(&point, step, &mut rng);
        point = transition.point;
        step = adaptation.update(transition.accept_prob);

        if (window_start..window_end).contains(&iteration) {
            variance.push(&point.theta);
        }
        if iteration + 1 == window_end && variance.count >= 2 {
            hmc.inv_metric = variance.regularized();
            step = hmc.reasonable_step(&point, &mut rng);
            adaptation = DualAveraging::new(step, options.target_accept);
        }
    }
    if options.tune > 0 {
        step = adaptation.final_step();
    }

    let mut draws = Vec::with_capacity(options.samples);
    let mut divergences = 0;
    let mut accept_sum = 0.0;
    let mut step_sum = 0;
    for _ in 0..options.samples {
        let transition = hmc.transition(&point, step, &mut rng);
        point = transition.point;
        divergences += usize::from(transition.divergent);
        accept_sum += transition.accept_prob;
        step_sum += transition.steps;

        let mut row = model.constrain(&point.theta);
        let derived = model.derived_values(&row);
        row.extend(derived);
        draws.push(row);
    }

    let samples = options.samples.max(1) as f64;
    let stats = ChainStats {
        chain,
        step_size: step,
        mean_accept_prob: accept_sum / samples,
        mean_leapfrog_steps: step_sum as f64 / samples,
        divergences,
    };
    tracing::debug!(
        chain,
        step_size = stats.step_size,
        accept = stats.mean_accept_prob,
        divergences,
        "chain finished"
    );
    Ok(ChainDraws { draws, stats })
}
