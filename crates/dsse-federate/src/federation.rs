//! In-process co-simulation.
//!
//! Wires one feeder, three measurement relays, the estimator and four
//! recorders onto a shared [`Broker`], one thread per federate:
//!
//! ```text
//!                ┌──► sensor_voltage_magnitude ──┐
//!  feeder ───────┼──► sensor_power_real ─────────┼──► estimator ──► recorder_voltage_mag
//!    │  │        └──► sensor_power_imaginary ────┘        │    └──► recorder_voltage_angle
//!    │  └──────────────── topology ───────────────────────┘
//!    └──► recorder_voltage_real, recorder_voltage_imag
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, Scope, ScopedJoinHandle};

use dsse_core::{AlgorithmParameters, DsseError, DsseResult, LinearSolverKind};
use serde::Serialize;
use tracing::{error, info};

use crate::broker::Broker;
use crate::config::{FeederConfig, InputMapping, MeasurementConfig};
use crate::estimator::{
    EstimatorFederate, EstimatorMetrics, ESTIMATOR_INPUTS, POWERS_IMAGINARY, POWERS_REAL,
    TOPOLOGY, VOLTAGES_MAGNITUDE, VOLTAGE_ANGLE_OUTPUT, VOLTAGE_MAG_OUTPUT,
};
use crate::feeder::{
    run_feeder, Feeder, ReplaySolver, POWERS_IMAG_OUTPUT, POWERS_REAL_OUTPUT, TOPOLOGY_OUTPUT,
    VOLTAGES_IMAG_OUTPUT, VOLTAGES_MAGNITUDE_OUTPUT, VOLTAGES_REAL_OUTPUT,
};
use crate::handle::FederateHandle;
use crate::recorder::{run_recorder, RECORDER_INPUT};
use crate::relay::{run_relay, MeasurementRelay, RelayStats, RELAY_INPUT, RELAY_OUTPUT};

pub const ESTIMATOR_NAME: &str = "estimator";

/// Sensor placement files, each a JSON list of node ids.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFiles {
    pub voltage_magnitude: PathBuf,
    pub power_real: PathBuf,
    pub power_imaginary: PathBuf,
}

impl SensorFiles {
    /// `voltage_ids.json`, `real_ids.json` and `reactive_ids.json` in `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            voltage_magnitude: dir.join("voltage_ids.json"),
            power_real: dir.join("real_ids.json"),
            power_imaginary: dir.join("reactive_ids.json"),
        }
    }
}

/// Recorder output files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingPaths {
    pub voltage_real: PathBuf,
    pub voltage_imag: PathBuf,
    pub voltage_mag: PathBuf,
    pub voltage_angle: PathBuf,
}

impl RecordingPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            voltage_real: dir.join("voltage_real.json"),
            voltage_imag: dir.join("voltage_imag.json"),
            voltage_mag: dir.join("voltage_mag.json"),
            voltage_angle: dir.join("voltage_angle.json"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CosimConfig {
    pub feeder: FeederConfig,
    pub sensors: SensorFiles,
    pub output_dir: PathBuf,
    pub voltage_variance: f64,
    pub power_variance: f64,
    pub seed: u64,
    pub parameters: AlgorithmParameters,
    pub linear_solver: LinearSolverKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct CosimSummary {
    pub ticks: usize,
    pub relays: Vec<(String, RelayStats)>,
    pub estimator: EstimatorMetrics,
    pub recorded: Vec<(String, usize)>,
    pub recordings: RecordingPaths,
}

fn spawn<'scope, T, F>(
    scope: &'scope Scope<'scope, '_>,
    name: &str,
    f: F,
) -> DsseResult<ScopedJoinHandle<'scope, DsseResult<T>>>
where
    T: Send + 'scope,
    F: FnOnce() -> DsseResult<T> + Send + 'scope,
{
    Ok(thread::Builder::new()
        .name(name.to_string())
        .spawn_scoped(scope, f)?)
}

fn join<T>(name: &str, handle: ScopedJoinHandle<'_, DsseResult<T>>) -> DsseResult<T> {
    let result = handle
        .join()
        .map_err(|_| DsseError::Substrate(format!("federate {name} panicked")))?;
    if let Err(err) = &result {
        error!(federate = name, %err, "federate failed");
    }
    result
}

/// Run the whole federation to completion.
///
/// Every thread is joined before returning; the first failure wins.
pub fn run_cosim(config: &CosimConfig) -> DsseResult<CosimSummary> {
    fs::create_dir_all(&config.output_dir)?;
    let recordings = RecordingPaths::in_dir(&config.output_dir);

    let solver = ReplaySolver::from_file(&config.feeder.case_file)?;
    let mut feeder = Feeder::new(solver, &config.feeder)?;
    let feeder_name = config.feeder.name.as_str();
    let channel = |federate: &str, key: &str| format!("{federate}/{key}");

    let broker = Broker::new();
    let feeder_handle = FederateHandle::new(broker.register(feeder_name, &[])?, InputMapping::new());

    let relay_specs = [
        (
            "sensor_voltage_magnitude",
            VOLTAGES_MAGNITUDE_OUTPUT,
            &config.sensors.voltage_magnitude,
            config.voltage_variance,
        ),
        (
            "sensor_power_real",
            POWERS_REAL_OUTPUT,
            &config.sensors.power_real,
            config.power_variance,
        ),
        (
            "sensor_power_imaginary",
            POWERS_IMAG_OUTPUT,
            &config.sensors.power_imaginary,
            config.power_variance,
        ),
    ];
    let mut relays = Vec::new();
    for (name, key, file, variance) in relay_specs {
        let inputs = InputMapping::new().with(RELAY_INPUT, channel(feeder_name, key));
        let federate = broker.register(name, &inputs.channels(&[RELAY_INPUT])?)?;
        let relay = MeasurementRelay::new(&MeasurementConfig {
            name: name.to_string(),
            gaussian_variance: variance,
            measurement_file: file.clone(),
            random_percent: 0.0,
            run_freq_time_step: 1.0,
            seed: config.seed,
        })?;
        relays.push((name, FederateHandle::new(federate, inputs), relay));
    }

    let estimator_inputs = InputMapping::new()
        .with(VOLTAGES_MAGNITUDE, channel("sensor_voltage_magnitude", RELAY_OUTPUT))
        .with(POWERS_REAL, channel("sensor_power_real", RELAY_OUTPUT))
        .with(POWERS_IMAGINARY, channel("sensor_power_imaginary", RELAY_OUTPUT))
        .with(TOPOLOGY, channel(feeder_name, TOPOLOGY_OUTPUT));
    let estimator = EstimatorFederate::new(
        FederateHandle::new(
            broker.register(ESTIMATOR_NAME, &estimator_inputs.channels(&ESTIMATOR_INPUTS)?)?,
            estimator_inputs,
        ),
        config.parameters.clone(),
    )
    .with_backend(config.linear_solver.build_solver());

    let recorder_specs = [
        ("recorder_voltage_real", channel(feeder_name, VOLTAGES_REAL_OUTPUT), &recordings.voltage_real),
        ("recorder_voltage_imag", channel(feeder_name, VOLTAGES_IMAG_OUTPUT), &recordings.voltage_imag),
        ("recorder_voltage_mag", channel(ESTIMATOR_NAME, VOLTAGE_MAG_OUTPUT), &recordings.voltage_mag),
        ("recorder_voltage_angle", channel(ESTIMATOR_NAME, VOLTAGE_ANGLE_OUTPUT), &recordings.voltage_angle),
    ];
    let mut recorders = Vec::new();
    for (name, source, path) in recorder_specs {
        let inputs = InputMapping::new().with(RECORDER_INPUT, source);
        let federate = broker.register(name, &inputs.channels(&[RECORDER_INPUT])?)?;
        recorders.push((name, FederateHandle::new(federate, inputs), path.clone()));
    }
    info!(federates = broker.connected(), "federation registered");

    thread::scope(|scope| -> DsseResult<CosimSummary> {
        let feeder_thread = spawn(scope, feeder_name, move || {
            run_feeder(feeder_handle, &mut feeder, &config.feeder)
        })?;
        let relay_threads = relays
            .into_iter()
            .map(|(name, handle, mut relay)| {
                spawn(scope, name, move || run_relay(handle, &mut relay)).map(|t| (name, t))
            })
            .collect::<DsseResult<Vec<_>>>()?;
        let estimator_thread = spawn(scope, ESTIMATOR_NAME, move || estimator.run())?;
        let recorder_threads = recorders
            .into_iter()
            .map(|(name, handle, path)| {
                spawn(scope, name, move || run_recorder(handle, &path)).map(|t| (name, t))
            })
            .collect::<DsseResult<Vec<_>>>()?;

        let ticks = join(feeder_name, feeder_thread);
        let relays: Vec<_> = relay_threads
            .into_iter()
            .map(|(name, t)| join(name, t).map(|stats| (name.to_string(), stats)))
            .collect();
        let estimator = join(ESTIMATOR_NAME, estimator_thread);
        let recorded: Vec<_> = recorder_threads
            .into_iter()
            .map(|(name, t)| join(name, t).map(|count| (name.to_string(), count)))
            .collect();

        let summary = CosimSummary {
            ticks: ticks?,
            relays: relays.into_iter().collect::<DsseResult<_>>()?,
            estimator: estimator?,
            recorded: recorded.into_iter().collect::<DsseResult<_>>()?,
            recordings: recordings.clone(),
        };
        info!(
            ticks = summary.ticks,
            processed = summary.estimator.ticks_processed,
            nonconverged = summary.estimator.nonconverged_solves,
            "co-simulation finished"
        );
        Ok(summary)
    })
}
