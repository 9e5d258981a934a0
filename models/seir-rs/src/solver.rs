//! Adaptive Dormand–Prince 5(4) integrator with dense output.
//!
//! Steps are controlled by the embedded fourth-order error estimate and
//! requested sample times are filled from the quartic continuous extension
//! of each accepted step, so the step sequence does not depend on where
//! the samples fall.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use crate::error::{SeirError, SeirResult};

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
/// `-1 / (error estimator order + 1)`
const ERROR_EXPONENT: f64 = -1.0 / 5.0;

const C: [f64; 6] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0];

const A: [[f64; 5]; 6] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
    ],
];

const B: [f64; 6] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
];

/// Difference between the fifth- and fourth-order weights, last entry for the FSAL stage.
const E: [f64; 7] = [
    -71.0 / 57600.0,
    0.0,
    71.0 / 16695.0,
    -71.0 / 1920.0,
    17253.0 / 339200.0,
    -22.0 / 525.0,
    1.0 / 40.0,
];

/// Coefficients of the quartic interpolant, row per stage, column per power of x.
const P: [[f64; 4]; 7] = [
    [
        1.0,
        -8048581381.0 / 2820520608.0,
        8663915743.0 / 2820520608.0,
        -12715105075.0 / 11282082432.0,
    ],
    [0.0, 0.0, 0.0, 0.0],
    [
        0.0,
        131558114200.0 / 32700410799.0,
        -68118460800.0 / 10900136933.0,
        87487479700.0 / 32700410799.0,
    ],
    [
        0.0,
        -1754552775.0 / 470086768.0,
        14199869525.0 / 1410260304.0,
        -10690763975.0 / 1880347072.0,
    ],
    [
        0.0,
        127303824393.0 / 49829197408.0,
        -318862633887.0 / 49829197408.0,
        701980252875.0 / 199316789632.0,
    ],
    [
        0.0,
        -282668133.0 / 205662961.0,
        2019193451.0 / 616988883.0,
        -1453857185.0 / 822651844.0,
    ],
    [
        0.0,
        40617522.0 / 29380423.0,
        -110615467.0 / 29380423.0,
        69997945.0 / 29380423.0,
    ],
];

/// Tolerances and limits for [`solve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    pub rtol: f64,
    pub atol: f64,
    /// Upper bound on attempted steps, accepted and rejected together.
    pub max_steps: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            rtol: 1e-3,
            atol: 1e-6,
            max_steps: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SolverStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub rhs_evaluations: usize,
}

#[derive(Debug, Clone)]
pub struct Solution<const D: usize> {
    pub t: Vec<f64>,
    pub y: Vec<SVector<f64, D>>,
    pub stats: SolverStats,
}

/// Integrates `dy/dt = rhs(t, y)` over `t_span` and samples the solution at `t_eval`.
///
/// `t_eval` must be non-decreasing and inside `t_span`. The integration always
/// runs to the end of the span.
pub fn solve<F, const D: usize>(
    rhs: F,
    t_span: (f64, f64),
    y0: SVector<f64, D>,
    t_eval: &[f64],
    config: &SolverConfig,
) -> SeirResult<Solution<D>>
where
    F: Fn(f64, &SVector<f64, D>) -> SVector<f64, D>,
{
    let (t0, t_end) = t_span;
    if !(t0.is_finite() && t_end.is_finite() && t_end > t0) {
        return Err(SeirError::Numerical(format!(
            "invalid integration span [{t0}, {t_end}]"
        )));
    }
    if !(config.rtol > 0.0 && config.atol > 0.0) {
        return Err(SeirError::Numerical(format!(
            "tolerances must be positive (rtol={}, atol={})",
            config.rtol, config.atol
        )));
    }
    if t_eval.iter().any(|t| !(t0..=t_end).contains(t)) {
        return Err(SeirError::Numerical(format!(
            "sample times must lie within [{t0}, {t_end}]"
        )));
    }
    if t_eval.windows(2).any(|w| w[1] < w[0]) {
        return Err(SeirError::Numerical("sample times must be sorted".into()));
    }

    let mut stepper = DormandPrince::new(rhs, t0, y0, t_end, *config)?;
    let mut y = Vec::with_capacity(t_eval.len());
    let mut next = 0;

    while stepper.t < t_end {
        stepper.step()?;
        while next < t_eval.len() && t_eval[next] <= stepper.t {
            let sample = stepper.dense(t_eval[next]);
            ensure_finite(&sample, t_eval[next])?;
            y.push(sample);
            next += 1;
        }
    }

    Ok(Solution {
        t: t_eval.to_vec(),
        y,
        stats: stepper.stats,
    })
}

struct DormandPrince<F, const D: usize> {
    rhs: F,
    config: SolverConfig,
    t_bound: f64,
    t: f64,
    y: SVector<f64, D>,
    /// Derivative at `(t, y)`, reused as the first stage of the next step.
    f: SVector<f64, D>,
    h_abs: f64,
    t_old: f64,
    y_old: SVector<f64, D>,
    k: [SVector<f64, D>; 7],
    stats: SolverStats,
}

impl<F, const D: usize> DormandPrince<F, D>
where
    F: Fn(f64, &SVector<f64, D>) -> SVector<f64, D>,
{
    fn new(
        rhs: F,
        t0: f64,
        y0: SVector<f64, D>,
        t_bound: f64,
        config: SolverConfig,
    ) -> SeirResult<Self> {
        ensure_finite(&y0, t0)?;
        let f0 = rhs(t0, &y0);
        ensure_finite(&f0, t0)?;
        let mut stepper = Self {
            rhs,
            config,
            t_bound,
            t: t0,
            y: y0,
            f: f0,
            h_abs: 0.0,
            t_old: t0,
            y_old: y0,
            k: [SVector::zeros(); 7],
            stats: SolverStats {
                rhs_evaluations: 1,
                ..Default::default()
            },
        };
        stepper.h_abs = stepper.initial_step();
        Ok(stepper)
    }

    fn initial_step(&mut self) -> f64 {
        let interval = self.t_bound - self.t;
        let scale = (self.y.abs() * self.config.rtol).add_scalar(self.config.atol);
        let d0 = rms(&self.y.component_div(&scale));
        let d1 = rms(&self.f.component_div(&scale));
        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        };
        let h0 = h0.min(interval);

        let y1 = self.y + self.f * h0;
        let f1 = (self.rhs)(self.t + h0, &y1);
        self.stats.rhs_evaluations += 1;
        let d2 = rms(&(f1 - self.f).component_div(&scale)) / h0;

        let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(1.0 / 5.0)
        };
        (100.0 * h0).min(h1).min(interval)
    }

    fn step(&mut self) -> SeirResult<()> {
        let t = self.t;
        let min_step = 10.0 * spacing(t);
        let mut h_abs = self.h_abs.max(min_step);
        let mut rejected = false;

        loop {
            let attempts = self.stats.accepted_steps + self.stats.rejected_steps;
            if attempts >= self.config.max_steps {
                return Err(SeirError::Numerical(format!(
                    "no convergence within {} steps (reached t={t})",
                    self.config.max_steps
                )));
            }
            if h_abs < min_step {
                return Err(SeirError::Numerical(format!(
                    "step size underflow at t={t}"
                )));
            }

            let t_new = (t + h_abs).min(self.t_bound);
            let h = t_new - t;
            h_abs = h.abs();

            let y_new = self.stages(h);
            ensure_finite(&y_new, t_new)?;
            ensure_finite(&self.k[6], t_new)?;

            let scale = (self.y.abs().sup(&y_new.abs()) * self.config.rtol)
                .add_scalar(self.config.atol);
            let error = self
                .k
                .iter()
                .zip(E)
                .fold(SVector::<f64, D>::zeros(), |acc, (k, e)| acc + k * e);
            let error_norm = rms(&(error * h).component_div(&scale));

            if error_norm < 1.0 {
                let mut factor = if error_norm == 0.0 {
                    MAX_FACTOR
                } else {
                    MAX_FACTOR.min(SAFETY * error_norm.powf(ERROR_EXPONENT))
                };
                if rejected {
                    factor = factor.min(1.0);
                }

                self.t_old = t;
                self.y_old = self.y;
                self.t = t_new;
                self.y = y_new;
                self.f = self.k[6];
                self.h_abs = h_abs * factor;
                self.stats.accepted_steps += 1;
                return Ok(());
            }

            h_abs *= MIN_FACTOR.max(SAFETY * error_norm.powf(ERROR_EXPONENT));
            rejected = true;
            self.stats.rejected_steps += 1;
        }
    }

    /// Runs the six explicit stages plus the FSAL stage, returning the fifth-order solution.
    fn stages(&mut self, h: f64) -> SVector<f64, D> {
        let (t, y) = (self.t, self.y);
        self.k[0] = self.f;
        for s in 1..6 {
            let dy = (0..s)
                .fold(SVector::<f64, D>::zeros(), |acc, j| acc + self.k[j] * A[s][j]);
            self.k[s] = (self.rhs)(t + C[s] * h, &(y + dy * h));
        }
        let dy = (0..6).fold(SVector::<f64, D>::zeros(), |acc, j| acc + self.k[j] * B[j]);
        let y_new = y + dy * h;
        self.k[6] = (self.rhs)(t + h, &y_new);
        self.stats.rhs_evaluations += 6;
        y_new
    }

    /// Evaluates the interpolant of the last accepted step at `t` in `[t_old, self.t]`.
    fn dense(&self, t: f64) -> SVector<f64, D> {
        let h = self.t - self.t_old;
        let x = (t - self.t_old) / h;
        let mut acc = SVector::<f64, D>::zeros();
        let mut power = x;
        for j in 0..4 {
            let q = self
                .k
                .iter()
                .zip(P.iter())
                .fold(SVector::<f64, D>::zeros(), |q, (k, p)| q + k * p[j]);
            acc += q * power;
            power *= x;
        }
        self.y_old + acc * h
    }
}

fn rms<const D: usize>(v: &SVector<f64, D>) -> f64 {
    v.norm() / (D as f64).sqrt()
}

/// Distance from `t` to the next representable float above `|t|`.
fn spacing(t: f64) -> f64 {
    let a = t.abs();
    f64::from_bits(a.to_bits() + 1) - a
}

fn ensure_finite<const D: usize>(y: &SVector<f64, D>, t: f64) -> SeirResult<()> {
    if y.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SeirError::Numerical(format!("non-finite state at t={t}")))
    }
}
