//! Weighted-least-squares state estimation.
//!
//! Given a topology and partial P, Q and |V| measurements, find the node
//! voltages `x = [θ; |V|]` that best explain them:
//!
//! ```text
//! minimize  ½ ‖z − h(x)‖²
//! ```
//!
//! where `z` stacks the observed measurements in internal units and `h` is
//! the measurement function of [`model`]. The minimization is unconstrained;
//! under-observed systems are handled by the trust-region damping alone.
//!
//! ## Units
//!
//! | Input | SI | PER_UNIT |
//! |-------|----|----------|
//! | `V` (V) | `V` | `V / Vb` |
//! | `P`, `Q` (kW, kVAR, consumption-positive) | `−1000·P` | `−P / base_power` |
//! | `Y` (S) | `Y` | `Vb_i·Y_ij·Vb_j / (base_power·1000)` |
//!
//! Angles are radians in both systems.
//!
//! ## Output
//!
//! Angles are shifted so the slack node reads exactly zero. The carried
//! [`EstimatorState`] stays in internal units; [`Estimate`] additionally
//! exposes SI magnitudes for publication.

pub mod admittance;
pub mod model;
pub mod trust_region;

use std::sync::Arc;

use chrono::NaiveDateTime;
use dsse_core::{
    AlgorithmParameters, CanonicalIndex, DsseError, DsseResult, FaerSolver, LinearSystemBackend,
    NodeId, PerUnitBase, PowersImaginary, PowersReal, Topology, VoltagesAngle,
    VoltagesMagnitude,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use admittance::{AdmittanceOperator, SparseAdmittance};
pub use model::{MeasurementModel, ObservedMeasurements};
pub use trust_region::{LeastSquaresProblem, SolveReport, Termination, TrustRegionSolver};

/// Initial guess carried from one solve to the next, in internal units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorState {
    pub angles: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

impl EstimatorState {
    pub fn new(angles: Vec<f64>, magnitudes: Vec<f64>) -> Self {
        Self { angles, magnitudes }
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    fn into_vector(self) -> Vec<f64> {
        let mut x = self.angles;
        x.extend(self.magnitudes);
        x
    }

    fn from_vector(mut x: Vec<f64>, n: usize) -> Self {
        let magnitudes = x.split_off(n);
        Self {
            angles: x,
            magnitudes,
        }
    }
}

/// Result of one estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub ids: Vec<NodeId>,
    /// Slack-referenced angles and internal-unit magnitudes, reused as the
    /// next initial guess
    pub state: EstimatorState,
    /// Magnitudes in volts
    pub magnitudes_si: Vec<f64>,
    pub report: SolveReport,
}

impl Estimate {
    pub fn angles(&self) -> &[f64] {
        &self.state.angles
    }

    pub fn voltage_magnitude(&self, time: Option<NaiveDateTime>) -> VoltagesMagnitude {
        VoltagesMagnitude::new(self.magnitudes_si.clone(), self.ids.clone()).with_time(time)
    }

    pub fn voltage_angle(&self, time: Option<NaiveDateTime>) -> VoltagesAngle {
        VoltagesAngle::new(self.state.angles.clone(), self.ids.clone()).with_time(time)
    }
}

/// WLS estimator bound to one topology.
///
/// Building it validates the topology, fixes the canonical order and scales
/// the admittance once; [`StateEstimator::estimate`] then runs per tick.
#[derive(Debug, Clone)]
pub struct StateEstimator {
    index: CanonicalIndex,
    base: PerUnitBase,
    base_angles: Vec<f64>,
    admittance: AdmittanceOperator,
    slack_index: usize,
    params: AlgorithmParameters,
    solver: TrustRegionSolver,
}

impl StateEstimator {
    pub fn new(topology: &Topology, params: AlgorithmParameters) -> DsseResult<Self> {
        params.validate()?;
        let index = topology.validate()?;
        let slack_index = topology.slack_index(&index)?;
        let (base_magnitudes, base_angles) = topology.base_voltages(&index)?;
        let base = PerUnitBase::new(&params, base_magnitudes);
        let admittance = AdmittanceOperator::from_topology(topology, &index, &base)?;
        let solver = TrustRegionSolver::new()
            .with_tolerance(params.tol)
            .with_max_iterations(params.max_iterations)
            .with_backend(Arc::new(FaerSolver));

        debug!(
            nodes = index.len(),
            slack = %index.ids()[slack_index],
            units = %params.units,
            "state estimator ready"
        );

        Ok(Self {
            index,
            base,
            base_angles,
            admittance,
            slack_index,
            params,
            solver,
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn LinearSystemBackend>) -> Self {
        self.solver = self.solver.with_backend(backend);
        self
    }

    /// Reference a different node than the topology's first slack bus.
    pub fn with_slack_index(mut self, slack_index: usize) -> DsseResult<Self> {
        if slack_index >= self.index.len() {
            return Err(DsseError::Validation(format!(
                "slack index {slack_index} out of range for {} nodes",
                self.index.len()
            )));
        }
        self.slack_index = slack_index;
        Ok(self)
    }

    pub fn index(&self) -> &CanonicalIndex {
        &self.index
    }

    pub fn slack_index(&self) -> usize {
        self.slack_index
    }

    pub fn parameters(&self) -> &AlgorithmParameters {
        &self.params
    }

    /// Flat start: base angles, and every magnitude set to the mean observed
    /// per-unit voltage (scaled back to volts per node in SI).
    pub fn flat_start(&self, voltages: &VoltagesMagnitude) -> DsseResult<EstimatorState> {
        voltages.validate()?;
        let known = self.index.get_indices(voltages)?;
        if known.is_empty() {
            return Err(DsseError::Validation(
                "flat start needs at least one voltage measurement".into(),
            ));
        }
        let mean_pu = known
            .iter()
            .zip(&voltages.values)
            .map(|(&k, &v)| v / self.base.voltages[k])
            .sum::<f64>()
            / known.len() as f64;
        let magnitudes = (0..self.index.len())
            .map(|i| self.base.magnitude_from_si(i, mean_pu * self.base.voltages[i]))
            .collect();
        Ok(EstimatorState::new(self.base_angles.clone(), magnitudes))
    }

    /// Stack the observed measurements in internal units.
    pub fn observe(
        &self,
        powers_real: &PowersReal,
        powers_imaginary: &PowersImaginary,
        voltages: &VoltagesMagnitude,
    ) -> DsseResult<ObservedMeasurements> {
        voltages.validate()?;
        powers_real.validate()?;
        powers_imaginary.validate()?;
        let known_v = self.index.get_indices(voltages)?;
        let known_p = self.index.get_indices(powers_real)?;
        let known_q = self.index.get_indices(powers_imaginary)?;

        let z = known_v
            .iter()
            .zip(&voltages.values)
            .map(|(&k, &v)| self.base.voltage_to_internal(k, v))
            .chain(
                powers_real
                    .values
                    .iter()
                    .map(|&p| self.base.power_to_internal(p)),
            )
            .chain(
                powers_imaginary
                    .values
                    .iter()
                    .map(|&q| self.base.power_to_internal(q)),
            )
            .collect::<Vec<f64>>();

        let rows = known_v.len() + known_p.len() + known_q.len();
        if z.len() != rows {
            return Err(DsseError::Validation(format!(
                "{} observed values for {rows} measurement rows",
                z.len()
            )));
        }
        Ok(ObservedMeasurements {
            known_v,
            known_p,
            known_q,
            z,
        })
    }

    /// Solve for the full state starting from `initial`.
    pub fn estimate(
        &self,
        powers_real: &PowersReal,
        powers_imaginary: &PowersImaginary,
        voltages: &VoltagesMagnitude,
        initial: EstimatorState,
    ) -> DsseResult<Estimate> {
        let n = self.index.len();
        for found in [initial.angles.len(), initial.magnitudes.len()] {
            if found != n {
                return Err(DsseError::StateDimension { expected: n, found });
            }
        }

        let observed = self.observe(powers_real, powers_imaginary, voltages)?;
        if observed.len() < 2 * n {
            debug!(
                measurements = observed.len(),
                unknowns = 2 * n,
                "system is under-observed"
            );
        }

        let model = MeasurementModel::new(&self.admittance, &observed);
        let (x, report) = self.solver.solve(&model, initial.into_vector())?;
        if !report.converged {
            warn!(
                iterations = report.iterations,
                cost = report.cost,
                "state estimation did not converge, publishing best iterate"
            );
        }

        let mut state = EstimatorState::from_vector(x, n);
        let slack_angle = state.angles[self.slack_index];
        for angle in &mut state.angles {
            *angle -= slack_angle;
        }
        let magnitudes_si = state
            .magnitudes
            .iter()
            .enumerate()
            .map(|(i, &m)| self.base.magnitude_to_si(i, m))
            .collect();

        Ok(Estimate {
            ids: self.index.ids().to_vec(),
            state,
            magnitudes_si,
            report,
        })
    }
}

/// One-shot estimation: build a [`StateEstimator`] and solve once.
///
/// `slack_index` overrides the topology's first slack bus.
pub fn state_estimator(
    topology: &Topology,
    powers_real: &PowersReal,
    powers_imaginary: &PowersImaginary,
    voltages: &VoltagesMagnitude,
    params: AlgorithmParameters,
    slack_index: usize,
    initial: EstimatorState,
) -> DsseResult<Estimate> {
    StateEstimator::new(topology, params)?
        .with_slack_index(slack_index)?
        .estimate(powers_real, powers_imaginary, voltages, initial)
}
