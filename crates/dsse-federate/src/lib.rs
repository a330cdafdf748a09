//! # dsse-federate: Co-simulation Federates
//!
//! Every component of the estimation pipeline runs as a federate: an
//! independently scheduled loop that advances only when the synchronization
//! substrate grants it a time.
//!
//! | Federate | Module | Consumes | Publishes |
//! |----------|--------|----------|-----------|
//! | Feeder | [`feeder`] | physical solver | topology, true voltages and powers |
//! | Measurement relay | [`relay`] | one true channel | noisy subset |
//! | State estimator | [`estimator`] | topology, P, Q, \|V\| | `voltage_mag`, `voltage_angle` |
//! | Recorder | [`recorder`] | any channel | JSON lines on disk |
//!
//! The substrate contract lives in [`substrate`]; [`broker`] implements it
//! in-process so a whole federation can run on threads ([`federation`]).
//! [`FederateHandle`] owns a connection and releases it exactly once.

pub mod broker;
pub mod config;
pub mod estimator;
pub mod federation;
pub mod feeder;
pub mod handle;
pub mod recorder;
pub mod relay;
pub mod substrate;

pub use broker::{Broker, BrokerFederate};
pub use config::{
    load_json, EstimatorConfig, FederateConfig, FeederConfig, InputMapping, MeasurementConfig,
    RecorderConfig,
};
pub use estimator::{EstimatorFederate, EstimatorMetrics, LoopState};
pub use federation::{run_cosim, CosimConfig, CosimSummary, RecordingPaths, SensorFiles};
pub use feeder::{run_feeder, Feeder, FeederSnapshot, PhysicalSolver, ReplayCase, ReplaySolver};
pub use handle::FederateHandle;
pub use recorder::{analyze_recordings, read_recording, run_recorder};
pub use relay::{run_relay, MeasurementRelay, RelayStats};
pub use substrate::{is_terminal, SimTime, Substrate, Update, MAX_TIME};
