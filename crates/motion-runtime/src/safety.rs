//! Safety supervisor (C4): fault guard, inter-axis sync-error guard, and
//! following-error observability logging. Runs once per cycle, before the
//! per-axis control step, against the just-read PDO inputs.

use motion_common::cia402::SW_FAULT_BIT;
use motion_common::drive::DriveSlot;
use tracing::{debug, error, warn};

/// Sticky sync-error latch (§4.4): once tripped, further `move-to` commands
/// are ignored until a client sends `reset-sync-error`.
#[derive(Debug, Default)]
pub struct SyncErrorGuard {
    tripped: bool,
}

impl SyncErrorGuard {
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn reset(&mut self) {
        self.tripped = false;
    }

    fn trip(&mut self) {
        self.tripped = true;
    }
}

/// One slave's PDO-read state as seen by the supervisor this cycle.
#[derive(Debug, Clone, Copy)]
pub struct AxisReading {
    pub status_word: u16,
    pub actual_pulses: i64,
}

/// Outcome of one supervisor pass: which slaves had their trajectory
/// aborted this cycle, and whether the sync-error flag is set.
#[derive(Debug, Default)]
pub struct SupervisorOutcome {
    pub aborted: Vec<usize>,
    pub sync_error: bool,
}

/// Runs the fault guard and sync-error guard over the current cycle's
/// readings, aborting trajectories on the affected slots in place (§4.4).
///
/// `threshold_pulses` is `max_sync_error_mm` converted via the Z-axis
/// kinematic constant (§3.1); `readings` and `slots` are indexed by slave.
pub fn run(
    guard: &mut SyncErrorGuard,
    slots: &mut [DriveSlot],
    readings: &[AxisReading],
    threshold_pulses: i64,
) -> SupervisorOutcome {
    let mut outcome = SupervisorOutcome::default();

    // 1. Fault guard: any moving axis reporting the CiA 402 fault bit aborts
    // every active trajectory in the batch, not just the faulted axis.
    let any_fault = slots
        .iter()
        .zip(readings)
        .any(|(slot, r)| slot.trajectory.is_some() && r.status_word & SW_FAULT_BIT != 0);

    if any_fault {
        for (i, (slot, r)) in slots.iter_mut().zip(readings).enumerate() {
            if slot.trajectory.is_some() {
                error!(slave = i, status_word = r.status_word, "drive fault, aborting trajectory");
                slot.abort_trajectory(r.actual_pulses);
                outcome.aborted.push(i);
            }
        }
    }

    // 2. Sync-error guard: adjacent-pair relative-position mismatch, only
    // meaningful with 2+ slaves and at least one axis moving.
    let any_moving = slots.iter().any(|s| s.trajectory.is_some());
    if slots.len() >= 2 && any_moving && !guard.is_tripped() {
        for i in 0..slots.len() - 1 {
            let rel_i = slots[i].relative_pulses(readings[i].actual_pulses);
            let rel_j = slots[i + 1].relative_pulses(readings[i + 1].actual_pulses);
            if (rel_i - rel_j).abs() > threshold_pulses {
                warn!(
                    slave_a = i,
                    slave_b = i + 1,
                    diff_pulses = (rel_i - rel_j).abs(),
                    threshold_pulses,
                    "sync error: aborting all active trajectories"
                );
                guard.trip();
                break;
            }
        }
    }

    if guard.is_tripped() {
        outcome.sync_error = true;
        for (i, (slot, r)) in slots.iter_mut().zip(readings).enumerate() {
            if slot.trajectory.is_some() {
                slot.abort_trajectory(r.actual_pulses);
                if !outcome.aborted.contains(&i) {
                    outcome.aborted.push(i);
                }
            }
        }
    }

    // 3. Following-error observability: the drive's own 0x6065 window is
    // widened to ~2e8 pulses so CSP's large cycle-0 following-error doesn't
    // fault the drive (§9), which leaves the master as the sole protector.
    // This doesn't abort anything, it just logs so an operator can see a
    // drive lagging its commanded target by more than the configured
    // tolerance.
    for (i, (slot, r)) in slots.iter().zip(readings).enumerate() {
        let following_error = (slot.target_pulses - r.actual_pulses).abs();
        if following_error > threshold_pulses {
            warn!(
                slave = i,
                following_error_pulses = following_error,
                threshold_pulses,
                "excessive following error"
            );
        } else {
            debug!(slave = i, following_error_pulses = following_error, "following error");
        }
    }

    outcome
}
