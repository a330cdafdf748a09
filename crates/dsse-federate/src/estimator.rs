//! State estimator federate: the synchronization loop around
//! [`StateEstimator`].
//!
//! ```text
//!  STARTING ──► WAITING_FOR_TIME ──► voltages fresh? ──no──┐
//!                    ▲                     │ yes           │
//!                    │                     ▼               │
//!                    │               PROCESSING            │
//!                    │                     │               │
//!                    │                     ▼               │
//!                    └──────────────  PUBLISHING           │
//!                    ▲                                     │
//!                    └─────────────────────────────────────┘
//!  max-time grant or error ──► TERMINATED (connection released once)
//! ```
//!
//! The topology is decoded on the first grant and again only when its channel
//! is refreshed. The first processed tick starts flat; later ticks start from
//! the previous estimate.

use std::sync::Arc;

use dsse_algo::{EstimatorState, StateEstimator};
use dsse_core::{
    AlgorithmParameters, DsseError, DsseResult, LinearSystemBackend, PowersImaginary,
    PowersReal, Topology, VoltagesAngle, VoltagesMagnitude,
};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::handle::FederateHandle;
use crate::substrate::{is_terminal, SimTime, Substrate, MAX_TIME};

pub const VOLTAGES_MAGNITUDE: &str = "voltages_magnitude";
pub const POWERS_REAL: &str = "powers_real";
pub const POWERS_IMAGINARY: &str = "powers_imaginary";
pub const TOPOLOGY: &str = "topology";

/// Logical inputs the estimator subscribes to.
pub const ESTIMATOR_INPUTS: [&str; 4] = [VOLTAGES_MAGNITUDE, POWERS_REAL, POWERS_IMAGINARY, TOPOLOGY];

pub const VOLTAGE_MAG_OUTPUT: &str = "voltage_mag";
pub const VOLTAGE_ANGLE_OUTPUT: &str = "voltage_angle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Starting,
    WaitingForTime,
    Processing,
    Publishing,
    Terminated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EstimatorMetrics {
    pub ticks_processed: usize,
    pub ticks_skipped_stale: usize,
    pub nonconverged_solves: usize,
    /// Solves that started from the previous tick's estimate
    pub warm_starts: usize,
    /// Trust-region iterations of the most recent solve
    pub last_iterations: usize,
}

pub struct EstimatorFederate<S: Substrate> {
    handle: FederateHandle<S>,
    params: AlgorithmParameters,
    backend: Option<Arc<dyn LinearSystemBackend>>,
    state: LoopState,
    estimator: Option<StateEstimator>,
    carried: Option<EstimatorState>,
    metrics: EstimatorMetrics,
}

impl<S: Substrate> EstimatorFederate<S> {
    pub fn new(handle: FederateHandle<S>, params: AlgorithmParameters) -> Self {
        Self {
            handle,
            params,
            backend: None,
            state: LoopState::Starting,
            estimator: None,
            carried: None,
            metrics: EstimatorMetrics::default(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn LinearSystemBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn metrics(&self) -> EstimatorMetrics {
        self.metrics
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = ?self.state, to = ?next, "estimator loop");
        self.state = next;
    }

    /// Run until the end-of-run grant, then release the connection.
    pub fn run(mut self) -> DsseResult<EstimatorMetrics> {
        let result = self.run_loop();
        self.transition(LoopState::Terminated);
        if let Err(err) = &result {
            error!(federate = self.handle.name(), %err, "estimator loop aborted");
        }
        let released = self.handle.disconnect();
        result?;
        released?;

        info!(
            federate = self.handle.name(),
            processed = self.metrics.ticks_processed,
            skipped_stale = self.metrics.ticks_skipped_stale,
            nonconverged = self.metrics.nonconverged_solves,
            warm_starts = self.metrics.warm_starts,
            "estimator finished"
        );
        Ok(self.metrics)
    }

    fn run_loop(&mut self) -> DsseResult<()> {
        self.handle.enter_execution_mode()?;
        loop {
            self.transition(LoopState::WaitingForTime);
            let granted = self.handle.request_time(MAX_TIME)?;
            if is_terminal(granted) {
                return Ok(());
            }

            self.refresh_topology()?;
            if !self.handle.is_updated(VOLTAGES_MAGNITUDE)? {
                self.metrics.ticks_skipped_stale += 1;
                debug!(time = granted, "no fresh voltages, skipping");
                continue;
            }

            self.transition(LoopState::Processing);
            let (magnitude, angle) = self.process(granted)?;

            self.transition(LoopState::Publishing);
            self.handle.publish(VOLTAGE_MAG_OUTPUT, &magnitude)?;
            self.handle.publish(VOLTAGE_ANGLE_OUTPUT, &angle)?;
        }
    }

    fn refresh_topology(&mut self) -> DsseResult<()> {
        if self.estimator.is_some() && !self.handle.is_updated(TOPOLOGY)? {
            return Ok(());
        }
        let Some(topology) = self.handle.read::<Topology>(TOPOLOGY)? else {
            return Ok(());
        };

        let mut estimator = StateEstimator::new(&topology, self.params.clone())?;
        if let Some(backend) = &self.backend {
            estimator = estimator.with_backend(Arc::clone(backend));
        }
        let same_nodes = self
            .estimator
            .as_ref()
            .is_some_and(|previous| previous.index().ids() == estimator.index().ids());
        if !same_nodes {
            self.carried = None;
        }
        info!(nodes = estimator.index().len(), "topology loaded");
        self.estimator = Some(estimator);
        Ok(())
    }

    fn process(&mut self, granted: SimTime) -> DsseResult<(VoltagesMagnitude, VoltagesAngle)> {
        let voltages: VoltagesMagnitude = self.handle.read_required(VOLTAGES_MAGNITUDE)?;
        let powers_real: PowersReal = self.handle.read_required(POWERS_REAL)?;
        let powers_imaginary: PowersImaginary = self.handle.read_required(POWERS_IMAGINARY)?;
        let estimator = self.estimator.as_ref().ok_or_else(|| {
            DsseError::Substrate("voltage measurements arrived before any topology".into())
        })?;

        let initial = match self.carried.take() {
            Some(state) => {
                self.metrics.warm_starts += 1;
                state
            }
            None => estimator.flat_start(&voltages)?,
        };
        info!(
            time = granted,
            voltages = voltages.len(),
            powers_real = powers_real.len(),
            powers_imaginary = powers_imaginary.len(),
            "estimating state"
        );
        let estimate = estimator.estimate(&powers_real, &powers_imaginary, &voltages, initial)?;

        self.metrics.ticks_processed += 1;
        self.metrics.last_iterations = estimate.report.iterations;
        if !estimate.report.converged {
            self.metrics.nonconverged_solves += 1;
        }
        debug!(
            iterations = estimate.report.iterations,
            termination = %estimate.report.termination,
            cost = estimate.report.cost,
            "estimate ready"
        );

        let time = voltages.time;
        let published = (estimate.voltage_magnitude(time), estimate.voltage_angle(time));
        self.carried = Some(estimate.state);
        Ok(published)
    }
}
