//! Unit conversion between RPM, millimeters, and encoder pulses (C8).
//!
//! Positions and setpoints are kept in an internal scale of
//! `2 x COUNTS_PER_REV` pulses per mechanical revolution - the doubling
//! reflects the drive's 2:1 position factor. Velocity SDO values use the
//! undoubled scale. All conversions route through this module so the scale
//! is applied consistently on both the send and read paths.

use crate::config::Axis;

/// Encoder counts per mechanical revolution, before the 2:1 position-factor
/// doubling is applied.
pub const COUNTS_PER_REV: f64 = 8_388_608.0;

/// Millimeters travelled per revolution of the X axis leadscrew.
pub const MM_PER_REV_X: f64 = 11.9993131404;

/// Millimeters travelled per revolution of the Z axis leadscrew.
pub const MM_PER_REV_Z: f64 = 5.99965657019;

/// Doubled pulse scale applied to all position (not velocity) quantities.
pub const POSITION_SCALE: f64 = 2.0;

/// Returns the kinematic constant (mm per revolution) for an axis.
#[must_use]
pub const fn mm_per_rev(axis: Axis) -> f64 {
    match axis {
        Axis::X => MM_PER_REV_X,
        Axis::Z => MM_PER_REV_Z,
    }
}

/// Converts a velocity in RPM to encoder pulses per second, at the
/// undoubled (SDO velocity) scale.
#[must_use]
pub fn rpm_to_pps(rpm: f64) -> i64 {
    (rpm / 60.0 * COUNTS_PER_REV).round() as i64
}

/// Converts an absolute position in millimeters to encoder pulses, at the
/// doubled position scale.
#[must_use]
pub fn mm_to_pulses(mm: f64, axis: Axis) -> i64 {
    (mm / mm_per_rev(axis) * COUNTS_PER_REV * POSITION_SCALE).round() as i64
}

/// Converts encoder pulses back to millimeters, at the doubled position
/// scale. Callers subtract the origin offset from `pulses` first to report
/// a position relative to the captured origin.
#[must_use]
pub fn pulses_to_mm(pulses: i64, axis: Axis) -> f64 {
    (pulses as f64) / (COUNTS_PER_REV * POSITION_SCALE) * mm_per_rev(axis)
}
