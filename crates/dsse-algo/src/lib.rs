//! # dsse-algo: Numeric Engine for Distribution State Estimation
//!
//! ## Weighted Least Squares
//!
//! [`StateEstimator`] solves for node voltage angles and magnitudes from
//! partial power and voltage measurements:
//!
//! | Stage | Module | Notes |
//! |-------|--------|-------|
//! | Unit normalization | [`wls`] | SI or per-unit, consumption-positive powers negated |
//! | Admittance | [`wls::admittance`] | dense or `sprs` CSR, identical results |
//! | Measurement model | [`wls::model`] | `h(x)` and analytic Jacobian |
//! | Minimization | [`wls::trust_region`] | Levenberg-Marquardt, `faer` LU per step |
//!
//! Solver non-convergence is reported through [`SolveReport`] and logged; the
//! best iterate is still returned.
//!
//! ## Producer-side checks
//!
//! [`power_balance`] verifies that declared equipment injections agree with
//! the power implied by solved voltages, failing hard on disagreement.
//!
//! ## Post-run analysis
//!
//! [`validation`] computes magnitude MAPE and angle MAE against ground truth.
//!
//! ## Example
//!
//! ```ignore
//! use dsse_algo::{StateEstimator, EstimatorState};
//! use dsse_core::AlgorithmParameters;
//!
//! let estimator = StateEstimator::new(&topology, AlgorithmParameters::default())?;
//! let mut state = estimator.flat_start(&voltages)?;
//!
//! let estimate = estimator.estimate(&powers_real, &powers_imag, &voltages, state)?;
//! println!("converged: {}", estimate.report.converged);
//! state = estimate.state.clone();
//! ```

pub mod power_balance;
pub mod test_utils;
pub mod validation;
pub mod wls;

pub use power_balance::{
    calculated_power, declared_injections, override_slack, PowerBalanceChecker,
    DEFAULT_BALANCE_TOLERANCE,
};
pub use validation::{error_table, voltage_errors, ErrorRow, ErrorTable, VoltageErrors};
pub use wls::{
    state_estimator, AdmittanceOperator, Estimate, EstimatorState, SolveReport, StateEstimator,
    Termination, TrustRegionSolver,
};
