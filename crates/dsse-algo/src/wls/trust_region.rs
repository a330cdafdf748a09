//! Levenberg-Marquardt trust-region solver for nonlinear least squares.
//!
//! Minimizes `F(x) = ½‖r(x)‖²` given the residual `r` and its Jacobian `J`.
//!
//! ## Step
//!
//! Each iteration solves the damped Gauss-Newton system
//!
//! ```text
//! (JᵀJ + μI) · δ = −Jᵀr
//! ```
//!
//! The damping `μ` plays the role of an inverse trust radius: a step whose
//! actual reduction agrees with the quadratic model shrinks `μ`, a rejected
//! step grows it. The update follows Nielsen (1999):
//!
//! ```text
//! ρ = (F(x) − F(x+δ)) / (½ δᵀ(μδ − Jᵀr))
//! ρ > 0: accept, μ ← μ · max(1/3, 1 − (2ρ − 1)³), ν ← 2
//! ρ ≤ 0: reject, μ ← μ · ν, ν ← 2ν
//! ```
//!
//! ## Stopping criteria
//!
//! One tolerance drives all three tests:
//!
//! - **gtol**: `‖Jᵀr‖∞ ≤ tol`
//! - **xtol**: `‖δ‖ ≤ tol · (tol + ‖x‖)`
//! - **ftol**: accepted step with `F(x) − F(x+δ) < tol · F(x)`
//!
//! Hitting the iteration budget is reported, not raised: callers get the
//! best iterate found and decide what to do with [`SolveReport::converged`].
//!
//! ## References
//!
//! - Nielsen, H.B. (1999). "Damping Parameter in Marquardt's Method."
//!   IMM-REP-1999-05, Technical University of Denmark.
//! - Madsen, K., Nielsen, H.B., Tingleff, O. (2004). "Methods for Non-Linear
//!   Least Squares Problems", 2nd ed., §3.2.

use std::fmt;
use std::sync::Arc;

use dsse_core::{DsseError, DsseResult, FaerSolver, LinearSystemBackend};
use serde::Serialize;
use tracing::{debug, trace};

/// Initial damping relative to the largest diagonal entry of `JᵀJ`.
const INITIAL_DAMPING_SCALE: f64 = 1e-3;

/// Damping floor so the damped system stays nonsingular.
const MIN_DAMPING: f64 = 1e-12;

/// Residual and Jacobian of a least-squares problem.
pub trait LeastSquaresProblem {
    fn residual(&self, x: &[f64]) -> Vec<f64>;

    /// Row-major `∂r/∂x`, one row per residual.
    fn jacobian(&self, x: &[f64]) -> Vec<Vec<f64>>;
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    Gtol,
    Ftol,
    Xtol,
    MaxIterations,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Termination::Gtol => "gradient tolerance reached",
            Termination::Ftol => "function tolerance reached",
            Termination::Xtol => "step tolerance reached",
            Termination::MaxIterations => "iteration budget exhausted",
        };
        f.write_str(text)
    }
}

/// Outcome of one least-squares solve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveReport {
    pub termination: Termination,
    pub iterations: usize,
    /// `½‖r‖²` at the returned point
    pub cost: f64,
    pub converged: bool,
}

impl SolveReport {
    fn new(termination: Termination, iterations: usize, cost: f64) -> Self {
        Self {
            termination,
            iterations,
            cost,
            converged: termination != Termination::MaxIterations,
        }
    }
}

#[derive(Clone)]
pub struct TrustRegionSolver {
    tol: f64,
    max_iterations: Option<usize>,
    backend: Arc<dyn LinearSystemBackend>,
}

impl fmt::Debug for TrustRegionSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustRegionSolver")
            .field("tol", &self.tol)
            .field("max_iterations", &self.max_iterations)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Default for TrustRegionSolver {
    fn default() -> Self {
        Self {
            tol: dsse_core::units::DEFAULT_TOLERANCE,
            max_iterations: None,
            backend: Arc::new(FaerSolver),
        }
    }
}

impl TrustRegionSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Iteration budget; defaults to `100 × len(x)`.
    pub fn with_max_iterations(mut self, max_iterations: Option<usize>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn LinearSystemBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Minimize `½‖r(x)‖²` starting from `x0`.
    pub fn solve<P: LeastSquaresProblem + ?Sized>(
        &self,
        problem: &P,
        x0: Vec<f64>,
    ) -> DsseResult<(Vec<f64>, SolveReport)> {
        let n = x0.len();
        let max_iterations = self.max_iterations.unwrap_or(100 * n.max(1));
        let tol = self.tol;

        let mut x = x0;
        let mut r = problem.residual(&x);
        let mut cost = half_norm_sq(&r);
        if !cost.is_finite() {
            return Err(DsseError::Solver(
                "residual is not finite at the initial point".into(),
            ));
        }
        let mut jac = problem.jacobian(&x);
        let mut normal = gram(&jac, n);
        let mut gradient = jt_times(&jac, &r, n);

        if inf_norm(&gradient) <= tol {
            return Ok((x, SolveReport::new(Termination::Gtol, 0, cost)));
        }

        let max_diag = (0..n).map(|i| normal[i][i]).fold(0.0_f64, f64::max);
        let mut mu = (INITIAL_DAMPING_SCALE * max_diag).max(MIN_DAMPING);
        let mut nu = 2.0_f64;

        for iteration in 1..=max_iterations {
            let mut damped = normal.clone();
            for (i, row) in damped.iter_mut().enumerate() {
                row[i] += mu;
            }
            let rhs: Vec<f64> = gradient.iter().map(|g| -g).collect();

            let step = match self.backend.solve(&damped, &rhs) {
                Ok(step) => step,
                Err(err) => {
                    debug!(iteration, mu, error = %err, "damped system failed, increasing damping");
                    mu *= nu;
                    nu *= 2.0;
                    if !mu.is_finite() {
                        return Err(DsseError::Solver(format!(
                            "damped normal equations stayed singular: {err}"
                        )));
                    }
                    continue;
                }
            };

            let step_norm = l2_norm(&step);
            if step_norm <= tol * (tol + l2_norm(&x)) {
                return Ok((x, SolveReport::new(Termination::Xtol, iteration, cost)));
            }

            let candidate: Vec<f64> = x.iter().zip(&step).map(|(a, b)| a + b).collect();
            let r_new = problem.residual(&candidate);
            let cost_new = half_norm_sq(&r_new);

            let predicted = 0.5
                * step
                    .iter()
                    .zip(&gradient)
                    .map(|(d, g)| d * (mu * d - g))
                    .sum::<f64>();
            let actual = cost - cost_new;
            let rho = if predicted > 0.0 && cost_new.is_finite() {
                actual / predicted
            } else {
                -1.0
            };
            trace!(iteration, cost, cost_new, mu, rho, "trust-region step");

            if rho > 0.0 {
                let previous_cost = cost;
                x = candidate;
                r = r_new;
                cost = cost_new;

                if actual < tol * previous_cost {
                    return Ok((x, SolveReport::new(Termination::Ftol, iteration, cost)));
                }

                jac = problem.jacobian(&x);
                normal = gram(&jac, n);
                gradient = jt_times(&jac, &r, n);
                if inf_norm(&gradient) <= tol {
                    return Ok((x, SolveReport::new(Termination::Gtol, iteration, cost)));
                }

                let factor = 1.0 - (2.0 * rho - 1.0).powi(3);
                mu = (mu * factor.max(1.0 / 3.0)).max(MIN_DAMPING);
                nu = 2.0;
            } else {
                mu *= nu;
                nu *= 2.0;
                if !mu.is_finite() {
                    return Ok((x, SolveReport::new(Termination::Xtol, iteration, cost)));
                }
            }
        }

        Ok((
            x,
            SolveReport::new(Termination::MaxIterations, max_iterations, cost),
        ))
    }
}

fn half_norm_sq(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|a| a * a).sum::<f64>().sqrt()
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |m, a| m.max(a.abs()))
}

/// `JᵀJ`
fn gram(jac: &[Vec<f64>], n: usize) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0; n]; n];
    for row in jac {
        for (i, &a) in row.iter().enumerate() {
            if a == 0.0 {
                continue;
            }
            for (j, &b) in row.iter().enumerate().skip(i) {
                out[i][j] += a * b;
            }
        }
    }
    for i in 0..n {
        for j in 0..i {
            out[i][j] = out[j][i];
        }
    }
    out
}

/// `Jᵀr`
fn jt_times(jac: &[Vec<f64>], r: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n];
    for (row, &ri) in jac.iter().zip(r) {
        for (o, &a) in out.iter_mut().zip(row) {
            *o += a * ri;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsse_core::GaussSolver;

    /// Rosenbrock as residuals: r = [10(x1 − x0²), 1 − x0]
    struct Rosenbrock;

    impl LeastSquaresProblem for Rosenbrock {
        fn residual(&self, x: &[f64]) -> Vec<f64> {
            vec![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]]
        }

        fn jacobian(&self, x: &[f64]) -> Vec<Vec<f64>> {
            vec![vec![-20.0 * x[0], 10.0], vec![-1.0, 0.0]]
        }
    }

    /// Overdetermined line fit y = a·t + b with exact data.
    struct LineFit {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for LineFit {
        fn residual(&self, x: &[f64]) -> Vec<f64> {
            self.t
                .iter()
                .zip(&self.y)
                .map(|(t, y)| x[0] * t + x[1] - y)
                .collect()
        }

        fn jacobian(&self, _x: &[f64]) -> Vec<Vec<f64>> {
            self.t.iter().map(|&t| vec![t, 1.0]).collect()
        }
    }

    #[test]
    fn rosenbrock_converges_to_minimum() {
        let solver = TrustRegionSolver::new().with_tolerance(1e-10);
        let (x, report) = solver.solve(&Rosenbrock, vec![-1.2, 1.0]).unwrap();
        assert!(report.converged, "{report:?}");
        assert!((x[0] - 1.0).abs() < 1e-6, "x0 = {}", x[0]);
        assert!((x[1] - 1.0).abs() < 1e-6, "x1 = {}", x[1]);
        assert!(report.cost < 1e-12);
    }

    #[test]
    fn starting_at_solution_stops_immediately() {
        let (x, report) = TrustRegionSolver::new()
            .solve(&Rosenbrock, vec![1.0, 1.0])
            .unwrap();
        assert_eq!(report.termination, Termination::Gtol);
        assert_eq!(report.iterations, 0);
        assert_eq!(x, vec![1.0, 1.0]);
    }

    #[test]
    fn linear_fit_with_gauss_backend() {
        let problem = LineFit {
            t: vec![0.0, 1.0, 2.0, 3.0],
            y: vec![1.0, 3.0, 5.0, 7.0],
        };
        let solver = TrustRegionSolver::new()
            .with_tolerance(1e-12)
            .with_backend(Arc::new(GaussSolver));
        let (x, report) = solver.solve(&problem, vec![0.0, 0.0]).unwrap();
        assert!(report.converged);
        assert!((x[0] - 2.0).abs() < 1e-8);
        assert!((x[1] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn tiny_budget_reports_max_iterations() {
        let solver = TrustRegionSolver::new()
            .with_tolerance(1e-14)
            .with_max_iterations(Some(1));
        let (_, report) = solver.solve(&Rosenbrock, vec![-1.2, 1.0]).unwrap();
        assert_eq!(report.termination, Termination::MaxIterations);
        assert!(!report.converged);
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn gram_and_gradient() {
        let jac = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert_eq!(gram(&jac, 2), vec![vec![10.0, 14.0], vec![14.0, 20.0]]);
        assert_eq!(jt_times(&jac, &[1.0, -1.0], 2), vec![-2.0, -2.0]);
    }
}
