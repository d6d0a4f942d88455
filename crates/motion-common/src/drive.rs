//! Per-slave drive data model (§3) and the shared egress state block (C7).
//!
//! [`DriveSlot`] is the control loop's private per-axis bookkeeping; nothing
//! outside the control context ever touches it. [`StateBlock`] is the
//! published read side: one [`SlaveSnapshot`] per slave, written wholesale
//! under a single lock once per cycle so readers never observe a frame with
//! some slaves updated and others stale.

use crate::config::Axis;
use std::sync::RwLock;
use std::time::Instant;

/// An active point-to-point interpolation on one axis (§3, §4.3).
///
/// `start_time` is shared by every axis co-started in the same batch; it is
/// stamped once per batch, not per axis, which is what makes the batch
/// co-started.
#[derive(Debug, Clone, Copy)]
pub struct Trajectory {
    /// Absolute encoder position the axis was at when the move began.
    pub start_pulses: i64,
    /// Absolute encoder position the move is driving towards.
    pub end_pulses: i64,
    /// Shared batch duration, in seconds.
    pub duration_s: f64,
    /// Monotonic instant the batch was stamped.
    pub start_time: Instant,
}

impl Trajectory {
    /// Raised-cosine (S-curve) progress in `[0, 1]` at `now` (§4.3).
    #[must_use]
    pub fn smoothstep(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.start_time).as_secs_f64();
        let progress = (elapsed / self.duration_s).clamp(0.0, 1.0);
        (1.0 - (std::f64::consts::PI * progress).cos()) / 2.0
    }

    /// The target position to emit this cycle, interpolated along the curve.
    #[must_use]
    pub fn emitted_target(&self, now: Instant) -> i64 {
        let smooth = self.smoothstep(now);
        let span = (self.end_pulses - self.start_pulses) as f64;
        (self.start_pulses as f64 + span * smooth).round() as i64
    }
}

/// Completion tolerance, in pulses (§3, §9: not configurable in the source).
pub const COMPLETION_TOLERANCE_PULSES: i64 = 50_000;

/// One slave's control-loop-private bookkeeping (§3 "Drive slot").
#[derive(Debug, Clone)]
pub struct DriveSlot {
    /// Kinematic identity, selecting the mm-per-rev constant.
    pub axis: Axis,
    /// Encoder pulses captured on `set_origin`; subtracted on mm reports.
    pub origin_offset: i64,
    /// Absolute target position commanded on the next PDO cycle.
    pub target_pulses: i64,
    /// Active interpolation, or `None` when holding position.
    pub trajectory: Option<Trajectory>,
    /// Last statusword read, for edge-detecting logging.
    pub last_status_word: u16,
    /// Profile velocity, in pulses/second (written via SDO before OP).
    pub profile_velocity_pps: i64,
    /// Profile acceleration, in pulses/s^2.
    pub profile_accel_pps2: i64,
    /// Profile deceleration, in pulses/s^2.
    pub profile_decel_pps2: i64,
}

impl DriveSlot {
    /// A freshly constructed slot, holding position at pulse 0 until the
    /// bootstrap handshake seeds `target_pulses` from the first actual read.
    #[must_use]
    pub fn new(axis: Axis) -> Self {
        Self {
            axis,
            origin_offset: 0,
            target_pulses: 0,
            trajectory: None,
            last_status_word: 0,
            profile_velocity_pps: 0,
            profile_accel_pps2: 0,
            profile_decel_pps2: 0,
        }
    }

    /// Clears any active trajectory and latches `target_pulses` to
    /// `actual_pulses` — the fail-safe target invariant (§3) applied on
    /// every abort path (fault, sync-error, following-error, shutdown).
    pub fn abort_trajectory(&mut self, actual_pulses: i64) {
        self.trajectory = None;
        self.target_pulses = actual_pulses;
    }

    /// Position relative to the captured origin, in pulses.
    #[must_use]
    pub fn relative_pulses(&self, actual_pulses: i64) -> i64 {
        actual_pulses - self.origin_offset
    }
}

/// One slave's published egress record (§3 "Shared state block").
#[derive(Debug, Clone, Copy, Default)]
pub struct SlaveSnapshot {
    /// Raw CiA 402 statusword.
    pub status_word: u16,
    /// Whether a trajectory is currently active on this axis.
    pub moving: bool,
    /// Raw encoder pulses, as last read from the PDO.
    pub actual_pulses: i64,
    /// Origin offset currently in effect.
    pub origin_offset: i64,
    /// Sync-error flag (safe variant): sticky until `reset_sync_error`.
    pub sync_error: bool,
}

/// The shared, lock-protected egress state block (C7).
///
/// The control loop is the sole writer and replaces every slot in one
/// critical section per cycle; client contexts read through a shared lock
/// guard and never block the writer for more than a snapshot copy.
#[derive(Debug)]
pub struct StateBlock {
    slots: RwLock<Vec<SlaveSnapshot>>,
}

impl StateBlock {
    /// Creates a state block with `num_slaves` zeroed slots.
    #[must_use]
    pub fn new(num_slaves: usize) -> Self {
        Self {
            slots: RwLock::new(vec![SlaveSnapshot::default(); num_slaves]),
        }
    }

    /// Publishes a full set of per-slave snapshots, replacing the prior
    /// cycle's values under one write lock.
    pub fn publish(&self, snapshots: &[SlaveSnapshot]) {
        let mut guard = self.slots.write().expect("state block lock poisoned");
        guard.copy_from_slice(snapshots);
    }

    /// Reads a consistent copy of one slave's snapshot.
    #[must_use]
    pub fn snapshot(&self, slave: usize) -> Option<SlaveSnapshot> {
        self.slots.read().expect("state block lock poisoned").get(slave).copied()
    }

    /// Reads a consistent copy of every slave's snapshot.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<SlaveSnapshot> {
        self.slots.read().expect("state block lock poisoned").clone()
    }

    /// Number of slaves backing this state block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().expect("state block lock poisoned").len()
    }

    /// Whether the state block has no slaves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
