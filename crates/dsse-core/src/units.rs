//! Unit systems and per-unit normalization bases.
//!
//! The estimator works in one of two unit systems:
//!
//! | System | Voltages | Powers | Admittance |
//! |--------|----------|--------|------------|
//! | `SI` | as measured (V) | ×1000 (kW → W) | as given (S) |
//! | `PER_UNIT` | ÷ per-node base voltage | ÷ `base_power` | `Vb_i · Y_ij · Vb_j / (base_power · 1000)` |
//!
//! Angles are always radians. Power channels are consumption-positive, so both
//! systems negate them on the way into the measurement vector (see
//! [`PerUnitBase::power_to_internal`]).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{DsseError, DsseResult};

/// Default base power used when `base_power` is absent.
pub const DEFAULT_BASE_POWER: f64 = 100.0;

/// Default convergence tolerance for every trust-region stopping criterion.
pub const DEFAULT_TOLERANCE: f64 = 5e-7;

/// Unit system the estimator normalizes inputs into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnitSystem {
    Si,
    #[default]
    PerUnit,
}

impl UnitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitSystem::Si => "SI",
            UnitSystem::PerUnit => "PER_UNIT",
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitSystem {
    type Err = DsseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SI" => Ok(UnitSystem::Si),
            "PER_UNIT" => Ok(UnitSystem::PerUnit),
            other => Err(DsseError::UnitSystem(other.to_string())),
        }
    }
}

impl Serialize for UnitSystem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UnitSystem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_base_power() -> Option<f64> {
    Some(DEFAULT_BASE_POWER)
}

/// Tuning knobs for the estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmParameters {
    /// Tolerance shared by the function, parameter and gradient criteria
    #[serde(default = "default_tolerance")]
    pub tol: f64,
    #[serde(default)]
    pub units: UnitSystem,
    /// Base power for per-unit normalization
    #[serde(default = "default_base_power")]
    pub base_power: Option<f64>,
    /// Trust-region iteration budget; `None` means `100 × len(x)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

impl Default for AlgorithmParameters {
    fn default() -> Self {
        Self {
            tol: DEFAULT_TOLERANCE,
            units: UnitSystem::PerUnit,
            base_power: Some(DEFAULT_BASE_POWER),
            max_iterations: None,
        }
    }
}

impl AlgorithmParameters {
    pub fn with_units(mut self, units: UnitSystem) -> Self {
        self.units = units;
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_base_power(mut self, base_power: f64) -> Self {
        self.base_power = Some(base_power);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Base power, falling back to [`DEFAULT_BASE_POWER`].
    pub fn base_power(&self) -> f64 {
        self.base_power.unwrap_or(DEFAULT_BASE_POWER)
    }

    /// Decode from a JSON value.
    ///
    /// The unit system is checked before anything else so an unknown value
    /// surfaces as [`DsseError::UnitSystem`] rather than a generic parse error.
    pub fn from_value(value: Value) -> DsseResult<Self> {
        if let Some(units) = value.get("units") {
            match units.as_str() {
                Some(s) => {
                    UnitSystem::from_str(s)?;
                }
                None => return Err(DsseError::UnitSystem(units.to_string())),
            }
        }
        let params: AlgorithmParameters = serde_json::from_value(value)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> DsseResult<()> {
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(DsseError::Configuration(format!(
                "tol must be positive, got {}",
                self.tol
            )));
        }
        let base_power = self.base_power();
        if !(base_power.is_finite() && base_power > 0.0) {
            return Err(DsseError::Configuration(format!(
                "base_power must be positive, got {base_power}"
            )));
        }
        if self.max_iterations == Some(0) {
            return Err(DsseError::Configuration(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Scaling between measured quantities and the estimator's internal units.
///
/// `voltages` are per-node base magnitudes in canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct PerUnitBase {
    pub units: UnitSystem,
    pub voltages: Vec<f64>,
    pub power: f64,
}

impl PerUnitBase {
    pub fn new(params: &AlgorithmParameters, base_voltages: Vec<f64>) -> Self {
        Self {
            units: params.units,
            voltages: base_voltages,
            power: params.base_power(),
        }
    }

    /// Measured voltage magnitude at canonical node `node` to internal units.
    pub fn voltage_to_internal(&self, node: usize, value: f64) -> f64 {
        match self.units {
            UnitSystem::Si => value,
            UnitSystem::PerUnit => value / self.voltages[node],
        }
    }

    /// Consumption-positive measured power to internal injected power.
    pub fn power_to_internal(&self, value: f64) -> f64 {
        match self.units {
            UnitSystem::Si => -1000.0 * value,
            UnitSystem::PerUnit => -value / self.power,
        }
    }

    /// Multiplier applied to admittance entry `(i, j)`.
    pub fn admittance_factor(&self, i: usize, j: usize) -> f64 {
        match self.units {
            UnitSystem::Si => 1.0,
            UnitSystem::PerUnit => self.voltages[i] * self.voltages[j] / (self.power * 1000.0),
        }
    }

    /// Internal magnitude at canonical node `node` back to SI.
    pub fn magnitude_to_si(&self, node: usize, value: f64) -> f64 {
        match self.units {
            UnitSystem::Si => value,
            UnitSystem::PerUnit => value * self.voltages[node],
        }
    }

    /// SI magnitude at canonical node `node` to internal units.
    pub fn magnitude_from_si(&self, node: usize, value: f64) -> f64 {
        match self.units {
            UnitSystem::Si => value,
            UnitSystem::PerUnit => value / self.voltages[node],
        }
    }
}
