use std::f64::consts::FRAC_PI_3;

use tracing::debug;

/// Maximum distance, in radians, from a multiple of π/3 that still snaps.
pub const PHASE_SNAP_TOLERANCE: f64 = 0.2;

/// Nominal phase of a solved angle: the nearest multiple of π/3 within
/// [`PHASE_SNAP_TOLERANCE`], else the raw angle.
pub fn snap_to_phase(angle: f64) -> f64 {
    let snapped = (angle / FRAC_PI_3).round() * FRAC_PI_3;
    if (angle - snapped).abs() < PHASE_SNAP_TOLERANCE {
        snapped
    } else {
        debug!(angle, "angle is not near a nominal phase, keeping it");
        angle
    }
}
