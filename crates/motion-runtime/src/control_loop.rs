//! Fixed-period control loop (C6): drain commands, instantiate batch
//! trajectories, run one PDO exchange, the safety pass, the per-axis CiA 402
//! step (with cross-coupling), publish state, then pace to the next
//! deadline with no catch-up on overrun (§4.6, §5).
//!
//! Each cycle's buffered outputs were written by the *previous* cycle's
//! per-axis step — `exchange()` both flushes last cycle's targets and reads
//! this cycle's fresh statuswords, matching the wire's own one-cycle latency.

use crate::fault_recorder::{AxisSnapshot, CycleTimings, FaultRecorder, FaultReason};
use crate::safety::{self, AxisReading, SupervisorOutcome, SyncErrorGuard};
use crate::trajectory::{self, BatchMember};
use crate::watchdog::Watchdog;
use crate::{bootstrap::BootstrapOutcome, coupling};
use motion_common::cia402;
use motion_common::command::Command;
use motion_common::config::MotionConfig;
use motion_common::diagnostics::LoopTelemetry;
use motion_common::drive::{DriveSlot, SlaveSnapshot, StateBlock};
use motion_common::units::{mm_to_pulses, rpm_to_pps};
use motion_fieldbus::EthercatMaster;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Runtime-adjustable cross-coupling gain and enable flag, sampled once per
/// cycle (§5 "coupling-configuration record"). `f64` has no atomic type, so
/// the gain is stored as its bit pattern.
#[derive(Debug)]
pub struct CouplingConfig {
    gain_bits: AtomicU64,
    enabled: AtomicBool,
}

impl CouplingConfig {
    #[must_use]
    pub fn new(gain: f64, enabled: bool) -> Self {
        Self {
            gain_bits: AtomicU64::new(gain.to_bits()),
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_gain(&self, gain: f64) {
        self.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn gain(&self) -> f64 {
        f64::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

const SHUTDOWN_DWELL: Duration = Duration::from_millis(100);
const SHUTDOWN_MAX_STEPS: u32 = 64;

/// The dedicated control context: owns the master and every slave's private
/// bookkeeping, and is the sole writer to `state_block`.
pub struct ControlLoop {
    master: EthercatMaster,
    slots: Vec<DriveSlot>,
    last_readings: Vec<AxisReading>,
    state_block: Arc<StateBlock>,
    commands: mpsc::Receiver<Command>,
    coupling: Arc<CouplingConfig>,
    sync_guard: SyncErrorGuard,
    fault_recorder: FaultRecorder,
    cycle_time: Duration,
    sync_error_threshold_pulses: i64,
    stop_requested: Arc<AtomicBool>,
    telemetry: Arc<LoopTelemetry>,
    watchdog: Option<Watchdog>,
    cycle: u64,
}

impl ControlLoop {
    /// Builds a control loop from a completed bootstrap handshake. The
    /// first `last_readings` are taken from the master's process image as
    /// left by bootstrap's final exchange, so `set-origin`/`move-to`
    /// commands draining in cycle 0 see real positions, not zeros.
    #[must_use]
    pub fn new(
        outcome: BootstrapOutcome,
        config: &MotionConfig,
        commands: mpsc::Receiver<Command>,
        state_block: Arc<StateBlock>,
        coupling: Arc<CouplingConfig>,
        stop_requested: Arc<AtomicBool>,
        telemetry: Arc<LoopTelemetry>,
        watchdog: Option<Watchdog>,
    ) -> Self {
        let BootstrapOutcome { master, slots } = outcome;
        telemetry.set_fieldbus_connected(true);

        let last_readings: Vec<AxisReading> = (0..slots.len())
            .map(|i| {
                let (status_word, actual_pulses) =
                    master.read_slave_input(i).unwrap_or((0, 0));
                AxisReading { status_word, actual_pulses: actual_pulses as i64 }
            })
            .collect();

        let threshold_pulses =
            mm_to_pulses(config.safety.max_sync_error_mm, motion_common::config::Axis::Z).abs();

        Self {
            master,
            slots,
            last_readings,
            state_block,
            commands,
            coupling,
            sync_guard: SyncErrorGuard::default(),
            fault_recorder: FaultRecorder::with_default_capacity(),
            cycle_time: config.cycle_time,
            sync_error_threshold_pulses: threshold_pulses,
            stop_requested,
            telemetry,
            watchdog,
            cycle: 0,
        }
    }

    /// Runs cycles until `stop_requested` is set or `max_cycles` is reached
    /// (`0` means unbounded), then performs the staged power-down.
    pub fn run(mut self, max_cycles: u64) -> motion_common::error::MotionResult<()> {
        info!(cycle_time = ?self.cycle_time, "control loop entering steady state");

        loop {
            if self.stop_requested.load(Ordering::Relaxed) {
                break;
            }

            let cycle_start = Instant::now();
            self.run_cycle(cycle_start)?;
            self.cycle += 1;

            if max_cycles != 0 && self.cycle >= max_cycles {
                break;
            }

            self.pace(cycle_start);
        }

        self.staged_shutdown()
    }

    fn run_cycle(&mut self, cycle_start: Instant) -> motion_common::error::MotionResult<()> {
        let moves = self.drain_commands();
        self.instantiate_moves(moves);

        let exchange_start = Instant::now();
        self.master.exchange()?;
        let fieldbus_exchange = exchange_start.elapsed();

        let readings: Vec<AxisReading> = (0..self.slots.len())
            .map(|i| {
                let (status_word, actual_pulses) = self.master.read_slave_input(i).unwrap_or((0, 0));
                AxisReading { status_word, actual_pulses: actual_pulses as i64 }
            })
            .collect();

        let safety_start = Instant::now();
        let outcome = safety::run(
            &mut self.sync_guard,
            &mut self.slots,
            &readings,
            self.sync_error_threshold_pulses,
        );
        let safety_check = safety_start.elapsed();

        let step_start = Instant::now();
        let snapshots = self.per_axis_step(&readings);
        let control_step = step_start.elapsed();

        self.state_block.publish(&snapshots);
        self.last_readings = readings;

        let total = cycle_start.elapsed();
        self.record_cycle(total, fieldbus_exchange, safety_check, control_step, &outcome, &snapshots);

        Ok(())
    }

    fn drain_commands(&mut self) -> Vec<Command> {
        let mut moves = Vec::new();

        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::MoveToMm { .. } => moves.push(cmd),
                Command::StopAll => {
                    info!("stop-all received, requesting shutdown at next boundary");
                    self.stop_requested.store(true, Ordering::Relaxed);
                    for (slave, slot) in self.slots.iter_mut().enumerate() {
                        let actual = self.last_readings.get(slave).map_or(slot.target_pulses, |r| r.actual_pulses);
                        slot.abort_trajectory(actual);
                    }
                }
                Command::SetAxis { slave, axis } => {
                    if let Some(slot) = self.slots.get_mut(slave) {
                        slot.axis = axis;
                    }
                }
                Command::SetOrigin { slave } => {
                    if let (Some(slot), Some(reading)) =
                        (self.slots.get_mut(slave), self.last_readings.get(slave))
                    {
                        slot.origin_offset = reading.actual_pulses;
                    }
                }
                Command::SetVelocity { slave, rpm } => {
                    if let Some(slot) = self.slots.get_mut(slave) {
                        slot.profile_velocity_pps = rpm_to_pps(rpm);
                    }
                }
                Command::SetAccel { slave, accel_pps2, decel_pps2 } => {
                    if let Some(slot) = self.slots.get_mut(slave) {
                        slot.profile_accel_pps2 = accel_pps2;
                        slot.profile_decel_pps2 = decel_pps2;
                    }
                }
                Command::ResetSyncError => {
                    self.sync_guard.reset();
                    info!("sync-error reset");
                }
            }
        }

        moves
    }

    fn instantiate_moves(&mut self, moves: Vec<Command>) {
        if moves.is_empty() {
            return;
        }

        if self.sync_guard.is_tripped() {
            warn!(count = moves.len(), "move-to commands ignored: sync-error not reset");
            return;
        }

        if self.stop_requested.load(Ordering::Relaxed) {
            warn!(count = moves.len(), "move-to commands ignored: shutdown requested");
            return;
        }

        let mut by_slave: HashMap<usize, f64> = HashMap::new();
        for cmd in moves {
            if let Command::MoveToMm { slave, mm } = cmd {
                by_slave.insert(slave, mm);
            }
        }

        let members: Vec<BatchMember> = by_slave
            .into_iter()
            .filter_map(|(slave, mm)| {
                let slot = self.slots.get(slave)?;
                let end_pulses = slot.origin_offset + mm_to_pulses(mm, slot.axis);
                Some(BatchMember {
                    slave,
                    start_pulses: slot.target_pulses,
                    end_pulses,
                    profile_velocity_pps: slot.profile_velocity_pps,
                })
            })
            .collect();

        if members.is_empty() {
            return;
        }

        let now = Instant::now();
        for (slave, traj) in trajectory::instantiate_batch(&members, now) {
            if let Some(slot) = self.slots.get_mut(slave) {
                slot.trajectory = Some(traj);
            }
        }
    }

    fn per_axis_step(&mut self, readings: &[AxisReading]) -> Vec<SlaveSnapshot> {
        let now = Instant::now();
        let mut targets = vec![0i64; self.slots.len()];

        for (i, slot) in self.slots.iter_mut().enumerate() {
            let reading = readings[i];
            slot.last_status_word = reading.status_word;

            if let Some(traj) = slot.trajectory {
                if trajectory::is_complete(&traj, reading.actual_pulses) {
                    slot.trajectory = None;
                    slot.target_pulses = traj.end_pulses;
                } else {
                    slot.target_pulses = traj.emitted_target(now);
                }
            }

            targets[i] = slot.target_pulses;
        }

        if self.slots.len() >= 2 {
            let gain = self.coupling.gain();
            let enabled = self.coupling.is_enabled();
            for i in 0..self.slots.len() - 1 {
                let (ti, tj) = coupling::apply_pair(
                    targets[i],
                    targets[i + 1],
                    readings[i].actual_pulses,
                    readings[i + 1].actual_pulses,
                    gain,
                    enabled,
                    self.sync_error_threshold_pulses,
                );
                targets[i] = ti;
                targets[i + 1] = tj;
            }
        }

        for (i, reading) in readings.iter().enumerate() {
            let (_, controlword) = cia402::next_controlword(reading.status_word);
            self.master.write_slave_output(i, controlword, targets[i] as i32);
        }

        self.slots
            .iter()
            .zip(readings)
            .map(|(slot, reading)| SlaveSnapshot {
                status_word: reading.status_word,
                moving: slot.trajectory.is_some(),
                actual_pulses: reading.actual_pulses,
                origin_offset: slot.origin_offset,
                sync_error: self.sync_guard.is_tripped(),
            })
            .collect()
    }

    fn record_cycle(
        &mut self,
        total: Duration,
        fieldbus_exchange: Duration,
        safety_check: Duration,
        control_step: Duration,
        outcome: &SupervisorOutcome,
        snapshots: &[SlaveSnapshot],
    ) {
        let timings = CycleTimings { fieldbus_exchange, safety_check, control_step, total };

        let moving_axes = snapshots.iter().filter(|s| s.moving).count();
        self.telemetry.set_moving_axes(moving_axes);
        self.telemetry.record_cycle(total, total > self.cycle_time);

        if let Some(watchdog) = &self.watchdog {
            watchdog.kick();
        }

        let reason = if outcome.sync_error {
            FaultReason::SyncError
        } else if !outcome.aborted.is_empty() {
            FaultReason::DriveFault
        } else {
            FaultReason::None
        };

        if reason == FaultReason::None {
            if let Some(frame) = self.fault_recorder.record_cycle(self.cycle, timings) {
                let axes = self
                    .slots
                    .iter()
                    .zip(snapshots)
                    .map(|(slot, snap)| AxisSnapshot { axis: slot.axis, snapshot: *snap, target_pulses: slot.target_pulses })
                    .collect();
                frame.set_axes(axes);
            }
        } else {
            let axes = self
                .slots
                .iter()
                .zip(snapshots)
                .map(|(slot, snap)| AxisSnapshot { axis: slot.axis, snapshot: *snap, target_pulses: slot.target_pulses })
                .collect();
            self.fault_recorder.record_fault_with_axes(self.cycle, reason, timings, axes);
            warn!(cycle = self.cycle, reason = %reason, "fault frame recorded");
        }
    }

    fn pace(&self, cycle_start: Instant) {
        let elapsed = cycle_start.elapsed();
        if elapsed < self.cycle_time {
            std::thread::sleep(self.cycle_time - elapsed);
        } else if elapsed > self.cycle_time {
            warn!(?elapsed, cycle_time = ?self.cycle_time, "cycle overrun, not catching up");
        }
    }

    /// Staged power-down (§4.2, §9): Operation-Enabled -> Switched-On ->
    /// Ready-To-Switch-On -> Switch-On-Disabled -> network INIT, one step
    /// per PDO cycle with a dwell between steps, target held at last-known
    /// actual throughout.
    fn staged_shutdown(&mut self) -> motion_common::error::MotionResult<()> {
        info!("starting staged power-down");
        let mut stage = cia402::ShutdownStage::DisableOperation;
        let mut steps = 0u32;

        while stage != cia402::ShutdownStage::Done && steps < SHUTDOWN_MAX_STEPS {
            for (slave, slot) in self.slots.iter().enumerate() {
                self.master.write_slave_output(slave, stage.controlword(), slot.target_pulses as i32);
            }
            self.master.exchange()?;
            steps += 1;

            let mut all_advanced = !self.slots.is_empty();
            let mut candidate = stage;
            for slave in 0..self.slots.len() {
                match self.master.read_slave_input(slave) {
                    Some((status, _actual)) => {
                        let advanced = stage.advance(status);
                        if advanced == stage {
                            all_advanced = false;
                        }
                        candidate = advanced;
                    }
                    None => all_advanced = false,
                }
            }

            std::thread::sleep(SHUTDOWN_DWELL);

            if all_advanced && candidate != stage {
                info!(?candidate, "staged power-down advanced");
                stage = candidate;
            }
        }

        info!(steps, "staged power-down complete, network returning to INIT");
        self.telemetry.set_fieldbus_connected(false);
        if let Some(watchdog) = &mut self.watchdog {
            watchdog.stop();
        }
        self.master.shutdown()
    }
}
