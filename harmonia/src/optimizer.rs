//! Phase-vector search against the harmony objective.
//!
//! For a candidate phase vector `p` the objective synthesises the
//! correction, subtracts it from the signal and scores the result:
//!
//! ```text
//! thd     = THD(signal - correction(p))
//! harmony = sqrt(thd * base² + mean(|balanced|)²)
//! cost    = |harmony - target|
//! ```
//!
//! The target defaults to the golden ratio; it is a tuning constant.
//!
//! The search is BFGS with central-difference gradients and a backtracking
//! line search. It runs to its own convergence test, bounded by the
//! iteration, evaluation and wall-clock budgets in `OptimizerConfig`.

use std::cell::Cell;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{BalanceError, Result};
use crate::signal::mean_abs;
use crate::synth::CorrectionSynthesizer;
use crate::thd::calculate_thd;
use crate::tracker::HarmonicLadder;

/// `(1 + √5) / 2`.
pub const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;

/// Armijo sufficient-decrease constant.
const ARMIJO_C1: f64 = 1e-4;
/// Maximum step halvings per line search.
const MAX_BACKTRACKS: usize = 40;

/// Budgets and tolerances of the phase search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    pub max_evaluations: usize,
    /// Stop when every gradient component is below this.
    pub gradient_tolerance: f64,
    /// Central-difference step in radians.
    pub step: f64,
    /// Optional wall-clock budget for one search.
    pub time_budget_ms: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            max_evaluations: 5000,
            gradient_tolerance: 1e-6,
            step: 1e-5,
            time_budget_ms: None,
        }
    }
}

/// Why the search stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    NoProgress,
    IterationBudget,
    EvaluationBudget,
    TimeBudget,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationOutcome {
    pub phases: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub stop: StopReason,
}

/// Harmony cost of a phase vector for one fixed signal.
///
/// The correction is linear in `sin p` and `cos p`, so the per-harmonic
/// sine and cosine carriers are computed once and every evaluation is a
/// weighted sum.
pub struct HarmonyObjective<'a> {
    signal: &'a [f64],
    sample_rate: f64,
    base_frequency: f64,
    num_harmonics: usize,
    target: f64,
    /// `(amplitude * sin(ωn), amplitude * cos(ωn))` per harmonic.
    carriers: Vec<(Vec<f64>, Vec<f64>)>,
}

impl<'a> HarmonyObjective<'a> {
    pub fn new(
        signal: &'a [f64],
        sample_rate: f64,
        ladder: &HarmonicLadder,
        synth: &CorrectionSynthesizer,
        target: f64,
    ) -> Self {
        let carriers = ladder
            .frequencies()
            .iter()
            .map(|&freq| {
                let amplitude = synth.model().amplitude(freq);
                let step = 2.0 * PI * freq / sample_rate;
                (0..signal.len())
                    .map(|n| {
                        let (s, c) = (step * n as f64).sin_cos();
                        (amplitude * s, amplitude * c)
                    })
                    .unzip()
            })
            .collect();
        Self {
            signal,
            sample_rate,
            base_frequency: ladder.base_frequency(),
            num_harmonics: ladder.len(),
            target,
            carriers,
        }
    }

    pub fn dimension(&self) -> usize {
        self.carriers.len()
    }

    /// `signal - correction(phases)`.
    pub fn balanced(&self, phases: &[f64]) -> Vec<f64> {
        let mut out = self.signal.to_vec();
        for ((sin_n, cos_n), &p) in self.carriers.iter().zip(phases) {
            let (sp, cp) = p.sin_cos();
            for ((v, s), c) in out.iter_mut().zip(sin_n).zip(cos_n) {
                // sin(ωn + p) = sin ωn cos p + cos ωn sin p
                *v -= s * cp + c * sp;
            }
        }
        out
    }

    /// Cost at `phases`; `NaN` when THD of the balanced signal is undefined.
    pub fn evaluate(&self, phases: &[f64]) -> f64 {
        let balanced = self.balanced(phases);
        let thd = match calculate_thd(&balanced, self.sample_rate, self.num_harmonics) {
            Ok(thd) => thd,
            Err(_) => return f64::NAN,
        };
        let level = mean_abs(&balanced);
        let harmony = (thd * self.base_frequency * self.base_frequency + level * level).sqrt();
        (harmony - self.target).abs()
    }
}

/// BFGS phase search.
#[derive(Clone, Debug, Default)]
pub struct PhaseOptimizer {
    config: OptimizerConfig,
}

impl PhaseOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Minimise `objective` starting from `initial`.
    pub fn optimize(
        &self,
        objective: &HarmonyObjective<'_>,
        initial: &[f64],
    ) -> Result<OptimizationOutcome> {
        if initial.len() != objective.dimension() {
            return Err(BalanceError::invalid(format!(
                "phase vector has {} entries, ladder has {}",
                initial.len(),
                objective.dimension()
            )));
        }
        if objective.signal.len() < 2 {
            return Err(BalanceError::invalid("phase search needs at least 2 samples"));
        }
        self.minimize(|p| objective.evaluate(p), initial)
    }

    /// BFGS on an arbitrary cost function.
    pub fn minimize<F>(&self, mut cost: F, initial: &[f64]) -> Result<OptimizationOutcome>
    where
        F: FnMut(&[f64]) -> f64,
    {
        let dim = initial.len();
        let started = Instant::now();
        let deadline = self.config.time_budget_ms.map(Duration::from_millis);
        let evaluations = Cell::new(0usize);
        let mut eval = |x: &[f64]| {
            evaluations.set(evaluations.get() + 1);
            cost(x)
        };

        let mut x = initial.to_vec();
        let mut fx = eval(&x);
        if !fx.is_finite() {
            return Err(BalanceError::OptimizerDivergence { evaluations: 1 });
        }
        let mut grad = central_gradient(&mut eval, &x, self.config.step);
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(BalanceError::OptimizerDivergence {
                evaluations: 1 + 2 * dim,
            });
        }
        let mut inv_hessian = identity(dim);
        let mut iterations = 0usize;

        let stop = loop {
            if inf_norm(&grad) < self.config.gradient_tolerance {
                break StopReason::Converged;
            }
            if iterations >= self.config.max_iterations {
                break StopReason::IterationBudget;
            }
            if deadline.is_some_and(|d| started.elapsed() >= d) {
                break StopReason::TimeBudget;
            }

            let mut direction: Vec<f64> = mat_vec(&inv_hessian, &grad).iter().map(|v| -v).collect();
            let mut slope = dot(&grad, &direction);
            if !(slope < 0.0) {
                inv_hessian = identity(dim);
                direction = grad.iter().map(|g| -g).collect();
                slope = dot(&grad, &direction);
            }

            let mut alpha = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let trial: Vec<f64> = x.iter().zip(&direction).map(|(xi, d)| xi + alpha * d).collect();
                let ft = eval(&trial);
                if ft.is_finite() && ft <= fx + ARMIJO_C1 * alpha * slope {
                    accepted = Some((trial, ft));
                    break;
                }
                alpha *= 0.5;
            }
            let Some((x_new, f_new)) = accepted else {
                break StopReason::NoProgress;
            };
            let grad_new = central_gradient(&mut eval, &x_new, self.config.step);
            if grad_new.iter().any(|g| !g.is_finite()) {
                x = x_new;
                fx = f_new;
                break StopReason::NoProgress;
            }

            let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = grad_new.iter().zip(&grad).map(|(a, b)| a - b).collect();
            let sy = dot(&s, &y);
            if sy > 1e-12 * norm(&s) * norm(&y) && sy > 0.0 {
                bfgs_update(&mut inv_hessian, &s, &y, sy);
            }

            let improvement = fx - f_new;
            x = x_new;
            fx = f_new;
            grad = grad_new;
            iterations += 1;

            if improvement <= f64::EPSILON * (1.0 + fx.abs()) {
                break StopReason::NoProgress;
            }
            if evaluations.get() >= self.config.max_evaluations {
                break StopReason::EvaluationBudget;
            }
        };

        Ok(OptimizationOutcome {
            phases: x,
            objective: fx,
            iterations,
            evaluations: evaluations.get(),
            stop,
        })
    }
}

fn central_gradient<F>(eval: &mut F, x: &[f64], h: f64) -> Vec<f64>
where
    F: FnMut(&[f64]) -> f64,
{
    let mut probe = x.to_vec();
    (0..x.len())
        .map(|i| {
            probe[i] = x[i] + h;
            let up = eval(&probe);
            probe[i] = x[i] - h;
            let down = eval(&probe);
            probe[i] = x[i];
            (up - down) / (2.0 * h)
        })
        .collect()
}

/// `H ← (I - ρ s yᵀ) H (I - ρ y sᵀ) + ρ s sᵀ` with `ρ = 1 / (yᵀ s)`.
fn bfgs_update(h: &mut [Vec<f64>], s: &[f64], y: &[f64], sy: f64) {
    let rho = 1.0 / sy;
    let hy = mat_vec(h, y);
    let yhy = dot(y, &hy);
    let n = s.len();
    for i in 0..n {
        for j in 0..n {
            h[i][j] += -rho * (s[i] * hy[j] + hy[i] * s[j]) + (rho * rho * yhy + rho) * s[i] * s[j];
        }
    }
}

fn identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn inf_norm(a: &[f64]) -> f64 {
    a.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}
