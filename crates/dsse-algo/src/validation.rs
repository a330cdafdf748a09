//! Error metrics comparing estimated voltages against ground truth.

use std::f64::consts::PI;

use chrono::NaiveDateTime;
use dsse_core::{Complex64, DsseError, DsseResult};
use serde::Serialize;
use tracing::warn;

/// Expected unit for angle values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleUnit {
    Radians,
    Degrees,
}

/// Result of angle unit sanity check
#[derive(Debug, Clone)]
pub struct AngleSanityResult {
    /// Whether the angles appear to be in the expected unit
    pub likely_correct: bool,
    pub detected_unit: AngleUnit,
    pub expected_unit: AngleUnit,
    /// Maximum absolute angle value seen
    pub max_abs_value: f64,
    /// Number of values that look suspicious
    pub suspicious_count: usize,
    pub total_count: usize,
}

impl AngleSanityResult {
    /// Log a warning if angles appear to be in wrong unit
    pub fn warn_if_suspicious(&self, context: &str) {
        if !self.likely_correct {
            warn!(
                context,
                detected = ?self.detected_unit,
                expected = ?self.expected_unit,
                max_abs = self.max_abs_value,
                suspicious = self.suspicious_count,
                total = self.total_count,
                "angles may be in the wrong unit"
            );
        }
    }
}

/// Check if angle values appear to be in the expected unit.
///
/// Distribution feeders carry three phases, so radian angles cluster near
/// `0` and `±2π/3`; anything beyond `π` in magnitude is suspicious. Degree
/// angles that all sit below `π` are equally suspicious.
pub fn check_angle_units(angles: &[f64], expected: AngleUnit) -> AngleSanityResult {
    let total = angles.len();
    let max_abs = angles.iter().fold(0.0_f64, |m, a| m.max(a.abs()));
    let beyond_pi = angles.iter().filter(|a| a.abs() > PI + 1e-9).count();

    let detected_unit = if total == 0 {
        expected
    } else if beyond_pi as f64 / total as f64 > 0.1 {
        AngleUnit::Degrees
    } else {
        AngleUnit::Radians
    };

    let (likely_correct, suspicious_count) = match expected {
        AngleUnit::Radians => (detected_unit == AngleUnit::Radians, beyond_pi),
        AngleUnit::Degrees => {
            let correct = total == 0 || max_abs > PI;
            (correct, if correct { 0 } else { total })
        }
    };

    AngleSanityResult {
        likely_correct,
        detected_unit,
        expected_unit: expected,
        max_abs_value: max_abs,
        suspicious_count,
        total_count: total,
    }
}

/// Magnitude and angle error of one estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct VoltageErrors {
    /// Mean absolute percentage error of magnitudes
    pub mape_percent: f64,
    /// Mean absolute angle error in degrees, wrapped into [0°, 180°]
    pub mae_degrees: f64,
    /// Nodes with nonzero true magnitude
    pub nodes_compared: usize,
}

/// Angle difference folded into `[0, π]`.
fn wrapped_angle_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % (2.0 * PI);
    if d >= PI {
        2.0 * PI - d
    } else {
        d
    }
}

/// Compare estimated phasors against truth, node by node.
///
/// Nodes with zero true magnitude (de-energized) are excluded from both
/// metrics.
pub fn voltage_errors(truth: &[Complex64], estimate: &[Complex64]) -> DsseResult<VoltageErrors> {
    if truth.len() != estimate.len() {
        return Err(DsseError::Validation(format!(
            "truth has {} nodes but estimate has {}",
            truth.len(),
            estimate.len()
        )));
    }

    let mut pct = 0.0;
    let mut deg = 0.0;
    let mut count = 0usize;
    for (t, e) in truth.iter().zip(estimate) {
        let true_mag = t.norm();
        if true_mag == 0.0 {
            continue;
        }
        pct += (true_mag - e.norm()).abs() / true_mag * 100.0;
        deg += wrapped_angle_difference(t.arg(), e.arg()).to_degrees();
        count += 1;
    }

    if count == 0 {
        return Ok(VoltageErrors::default());
    }
    Ok(VoltageErrors {
        mape_percent: pct / count as f64,
        mae_degrees: deg / count as f64,
        nodes_compared: count,
    })
}

/// One row of the per-tick error table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRow {
    pub time: Option<NaiveDateTime>,
    #[serde(flatten)]
    pub errors: VoltageErrors,
}

/// Per-tick errors plus the metric over every (tick, node) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorTable {
    pub rows: Vec<ErrorRow>,
    pub overall: VoltageErrors,
}

/// Build the error table over aligned time series.
///
/// `truth[k]` and `estimate[k]` must share node order.
pub fn error_table(
    times: &[Option<NaiveDateTime>],
    truth: &[Vec<Complex64>],
    estimate: &[Vec<Complex64>],
) -> DsseResult<ErrorTable> {
    if times.len() != truth.len() || truth.len() != estimate.len() {
        return Err(DsseError::Validation(format!(
            "series lengths differ: {} times, {} truth rows, {} estimate rows",
            times.len(),
            truth.len(),
            estimate.len()
        )));
    }

    let angles: Vec<f64> = estimate.iter().flatten().map(|v| v.arg()).collect();
    check_angle_units(&angles, AngleUnit::Radians).warn_if_suspicious("estimated angles");

    let rows = times
        .iter()
        .zip(truth.iter().zip(estimate))
        .map(|(&time, (t, e))| {
            Ok(ErrorRow {
                time,
                errors: voltage_errors(t, e)?,
            })
        })
        .collect::<DsseResult<Vec<_>>>()?;

    let all_truth: Vec<Complex64> = truth.iter().flatten().copied().collect();
    let all_estimate: Vec<Complex64> = estimate.iter().flatten().copied().collect();
    let overall = voltage_errors(&all_truth, &all_estimate)?;

    Ok(ErrorTable { rows, overall })
}
