//! S-curve trajectory engine (C3): per-slave position interpolation with
//! co-started, equal-duration batches.
//!
//! All `move-to-mm` commands drained together in one control-loop cycle are
//! instantiated as one batch: every axis in the batch gets the same
//! `start_time` and the same `duration_s`, the latter being the slowest
//! axis's own natural travel time at its configured profile velocity. This
//! is what makes a multi-axis move complete simultaneously instead of each
//! axis finishing in its own time.

use motion_common::drive::{Trajectory, COMPLETION_TOLERANCE_PULSES};
use motion_common::units::POSITION_SCALE;
use std::time::Instant;

/// One axis's contribution to a co-started batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchMember {
    pub slave: usize,
    pub start_pulses: i64,
    pub end_pulses: i64,
    pub profile_velocity_pps: i64,
}

/// The natural (unclamped) travel time for one axis at its profile
/// velocity. Pulse quantities are at the doubled position scale (§8); the
/// configured profile velocity is stored undoubled, matching the SDO value,
/// so it's re-doubled here.
///
/// A non-positive profile velocity can't move the axis at all; treated as
/// an immediate (zero-duration) move rather than dividing by zero.
#[must_use]
pub fn natural_duration_s(start_pulses: i64, end_pulses: i64, profile_velocity_pps: i64) -> f64 {
    if profile_velocity_pps <= 0 {
        return 0.0;
    }
    let distance = (end_pulses - start_pulses).unsigned_abs() as f64;
    let pps = profile_velocity_pps as f64 * POSITION_SCALE;
    distance / pps
}

/// Instantiates one co-started batch: computes the shared duration as the
/// slowest member's natural duration, then stamps every member with the
/// same `start_time` (§4.3, §9 batch co-start).
#[must_use]
pub fn instantiate_batch(members: &[BatchMember], now: Instant) -> Vec<(usize, Trajectory)> {
    let duration_s = members
        .iter()
        .map(|m| natural_duration_s(m.start_pulses, m.end_pulses, m.profile_velocity_pps))
        .fold(0.0_f64, f64::max)
        .max(0.1);

    members
        .iter()
        .map(|m| {
            (
                m.slave,
                Trajectory {
                    start_pulses: m.start_pulses,
                    end_pulses: m.end_pulses,
                    duration_s,
                    start_time: now,
                },
            )
        })
        .collect()
}

/// Position-based completion test at the fixed tolerance (§3, §9).
#[must_use]
pub fn is_complete(trajectory: &Trajectory, actual_pulses: i64) -> bool {
    (actual_pulses - trajectory.end_pulses).abs() <= COMPLETION_TOLERANCE_PULSES
}
