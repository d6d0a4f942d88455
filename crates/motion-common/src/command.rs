//! Ingress command vocabulary (C7).
//!
//! Commands are tagged by which slave they apply to; bus-level commands
//! ([`Command::StopAll`], [`Command::ResetSyncError`]) carry no slave index
//! at all rather than the source's `slave_index == -1` sentinel — the
//! enum variant itself is the tag.

use crate::config::Axis;

/// One command drained from the ingress channel in a control-loop cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Abort every active trajectory and hold every axis at its current
    /// position; does not itself tear down the bus (see the control loop's
    /// own stop lifecycle).
    StopAll,
    /// Re-tag a slave's kinematic identity.
    SetAxis {
        /// Target slave.
        slave: usize,
        /// New axis identity.
        axis: Axis,
    },
    /// Latch the slave's current actual pulses as its new origin.
    SetOrigin {
        /// Target slave.
        slave: usize,
    },
    /// Set the profile velocity used for future move durations.
    SetVelocity {
        /// Target slave.
        slave: usize,
        /// Requested profile velocity, in RPM.
        rpm: f64,
    },
    /// Set profile acceleration/deceleration.
    SetAccel {
        /// Target slave.
        slave: usize,
        /// Profile acceleration, in pulses/s^2.
        accel_pps2: i64,
        /// Profile deceleration, in pulses/s^2.
        decel_pps2: i64,
    },
    /// Start (or replace) a trajectory to an absolute position.
    MoveToMm {
        /// Target slave.
        slave: usize,
        /// Absolute target position, in millimeters, relative to origin.
        mm: f64,
    },
    /// Clear the sticky sync-error flag, re-admitting future `MoveToMm`.
    ResetSyncError,
}

impl Command {
    /// The slave this command applies to, or `None` for a bus-level command.
    #[must_use]
    pub fn slave(&self) -> Option<usize> {
        match *self {
            Command::StopAll | Command::ResetSyncError => None,
            Command::SetAxis { slave, .. }
            | Command::SetOrigin { slave }
            | Command::SetVelocity { slave, .. }
            | Command::SetAccel { slave, .. }
            | Command::MoveToMm { slave, .. } => Some(slave),
        }
    }

    /// Whether this command is a `MoveToMm` request (used to bucket the
    /// per-cycle batch for co-started trajectory instantiation, §4.3).
    #[must_use]
    pub fn is_move(&self) -> bool {
        matches!(self, Command::MoveToMm { .. })
    }
}
