//! Federate configuration files.
//!
//! Each federate reads two JSON files from its configuration directory once
//! at startup:
//!
//! | File | Contents |
//! |------|----------|
//! | `static_inputs.json` | federate-specific parameters ([`EstimatorConfig`], [`MeasurementConfig`], ...) |
//! | `input_mapping.json` | logical input key -> fully qualified channel (`"feeder/powers_real"`) |
//!
//! Anything missing or malformed is a [`DsseError::Configuration`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use dsse_core::{AlgorithmParameters, DsseError, DsseResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATIC_INPUTS: &str = "static_inputs.json";
pub const INPUT_MAPPING: &str = "input_mapping.json";

/// Timestamp format of `start_date`.
pub const START_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Read and decode a JSON file, reporting the path on failure.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> DsseResult<T> {
    let text = fs::read_to_string(path).map_err(|e| {
        DsseError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| DsseError::Configuration(format!("invalid {}: {e}", path.display())))
}

/// Logical input key to subscribed channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputMapping(BTreeMap<String, String>);

impl InputMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, channel: impl Into<String>) -> Self {
        self.0.insert(key.into(), channel.into());
        self
    }

    pub fn from_file(path: &Path) -> DsseResult<Self> {
        load_json(path)
    }

    pub fn channel(&self, key: &str) -> DsseResult<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| DsseError::Configuration(format!("input_mapping has no {key:?} entry")))
    }

    /// Channels for every key, failing on the first missing one.
    pub fn channels(&self, keys: &[&str]) -> DsseResult<Vec<String>> {
        keys.iter()
            .map(|k| self.channel(k).map(str::to_string))
            .collect()
    }
}

/// Static inputs and input mapping of one federate.
#[derive(Debug, Clone)]
pub struct FederateConfig<T> {
    pub static_inputs: T,
    pub inputs: InputMapping,
}

impl<T: DeserializeOwned> FederateConfig<T> {
    /// Load `static_inputs.json` and `input_mapping.json` from `dir`.
    pub fn load(dir: &Path) -> DsseResult<Self> {
        Ok(Self {
            static_inputs: load_json(&dir.join(STATIC_INPUTS))?,
            inputs: InputMapping::from_file(&dir.join(INPUT_MAPPING))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub name: String,
    /// Raw parameters, decoded by [`EstimatorConfig::parameters`]
    #[serde(default)]
    pub algorithm_parameters: Option<Value>,
}

impl EstimatorConfig {
    pub fn parameters(&self) -> DsseResult<AlgorithmParameters> {
        match &self.algorithm_parameters {
            Some(value) => AlgorithmParameters::from_value(value.clone()),
            None => Ok(AlgorithmParameters::default()),
        }
    }
}

fn default_run_freq_time_step() -> f64 {
    1.0
}

fn default_seed() -> u64 {
    12345
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    pub name: String,
    pub gaussian_variance: f64,
    /// JSON list of the ids this relay measures
    pub measurement_file: PathBuf,
    #[serde(default)]
    pub random_percent: f64,
    #[serde(default = "default_run_freq_time_step")]
    pub run_freq_time_step: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_run_freq_sec() -> f64 {
    900.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeederConfig {
    pub name: String,
    /// `"%Y-%m-%d %H:%M:%S"`
    pub start_date: String,
    pub number_of_timesteps: usize,
    /// Simulated seconds per tick
    #[serde(default = "default_run_freq_sec")]
    pub run_freq_sec: f64,
    #[serde(default)]
    pub use_sparse_admittance: bool,
    #[serde(default)]
    pub topology_output: Option<PathBuf>,
    pub case_file: PathBuf,
}

impl FeederConfig {
    pub fn start(&self) -> DsseResult<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.start_date, START_DATE_FORMAT).map_err(|e| {
            DsseError::Configuration(format!("start_date {:?}: {e}", self.start_date))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub name: String,
    /// JSON-lines file receiving one measurement array per update
    pub output_file: PathBuf,
}
