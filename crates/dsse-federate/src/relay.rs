//! Measurement relay federate.
//!
//! Turns one ground-truth channel into a sensor channel: keep the configured
//! subset of ids, then add zero-mean Gaussian noise. The id subset is re-read
//! from `measurement_file` on every update so sensor placement can change
//! during a run. The noise stream is seeded once and advances across the whole
//! run.

use std::fs;
use std::path::PathBuf;

use dsse_core::{reindex, DsseError, DsseResult, MeasurementArray, NodeId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::MeasurementConfig;
use crate::handle::FederateHandle;
use crate::substrate::{is_terminal, Substrate, MAX_TIME};

/// Ground-truth input key.
pub const RELAY_INPUT: &str = "subscription";
/// Publication key of the noisy measurements.
pub const RELAY_OUTPUT: &str = "publication";

#[derive(Debug, Clone)]
pub struct MeasurementRelay {
    rng: StdRng,
    noise: Normal<f64>,
    measurement_file: PathBuf,
}

impl MeasurementRelay {
    pub fn new(config: &MeasurementConfig) -> DsseResult<Self> {
        if !(config.gaussian_variance >= 0.0) {
            return Err(DsseError::Configuration(format!(
                "gaussian_variance must be non-negative, got {}",
                config.gaussian_variance
            )));
        }
        let noise = Normal::new(0.0, config.gaussian_variance.sqrt())
            .map_err(|e| DsseError::Configuration(format!("noise distribution: {e}")))?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            noise,
            measurement_file: config.measurement_file.clone(),
        })
    }

    /// Current sensor placement.
    pub fn target_ids(&self) -> DsseResult<Vec<NodeId>> {
        let text = fs::read_to_string(&self.measurement_file)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Select `target` from `truth` (strict) and perturb every value.
    pub fn transform(
        &mut self,
        truth: &MeasurementArray,
        target: &[NodeId],
    ) -> DsseResult<MeasurementArray> {
        let selected = reindex(truth, target)?;
        Ok(selected.apply(|v| v + self.noise.sample(&mut self.rng)))
    }

    /// [`MeasurementRelay::transform`] against the ids currently on disk.
    pub fn measure(&mut self, truth: &MeasurementArray) -> DsseResult<MeasurementArray> {
        let target = self.target_ids()?;
        self.transform(truth, &target)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub published: usize,
    pub skipped: usize,
}

/// Relay every fresh ground-truth update until the end-of-run grant.
pub fn run_relay<S: Substrate>(
    mut handle: FederateHandle<S>,
    relay: &mut MeasurementRelay,
) -> DsseResult<RelayStats> {
    let mut stats = RelayStats::default();
    handle.enter_execution_mode()?;

    let mut granted = handle.request_time(MAX_TIME)?;
    while !is_terminal(granted) {
        if handle.is_updated(RELAY_INPUT)? {
            let truth: MeasurementArray = handle.read_required(RELAY_INPUT)?;
            let measured = relay.measure(&truth)?;
            debug!(
                federate = handle.name(),
                time = granted,
                values = measured.len(),
                "relaying measurements"
            );
            handle.publish(RELAY_OUTPUT, &measured)?;
            stats.published += 1;
        } else {
            stats.skipped += 1;
        }
        granted = handle.request_time(MAX_TIME)?;
    }

    info!(
        federate = handle.name(),
        published = stats.published,
        skipped = stats.skipped,
        "relay finished"
    );
    handle.disconnect()?;
    Ok(stats)
}
