//! Fault frame recording for postmortem diagnosis.
//!
//! A ring buffer of recent control-loop cycles so that, when the loop
//! faults (cycle overrun, watchdog timeout, fieldbus/WKC error, a drive
//! fault, or a sync-error trip), the cycles leading up to it are still
//! available for inspection instead of only the faulting one.

use motion_common::config::Axis;
use motion_common::drive::SlaveSnapshot;
use std::time::Duration;

pub const DEFAULT_FAULT_FRAME_COUNT: usize = 64;

/// Reason a cycle was flagged as a fault frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultReason {
    #[default]
    None,
    CycleOverrun,
    WatchdogTimeout,
    FieldbusError,
    WkcError,
    DriveFault,
    SyncError,
    External,
}

impl std::fmt::Display for FaultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::CycleOverrun => write!(f, "CYCLE_OVERRUN"),
            Self::WatchdogTimeout => write!(f, "WATCHDOG_TIMEOUT"),
            Self::FieldbusError => write!(f, "FIELDBUS_ERROR"),
            Self::WkcError => write!(f, "WKC_ERROR"),
            Self::DriveFault => write!(f, "DRIVE_FAULT"),
            Self::SyncError => write!(f, "SYNC_ERROR"),
            Self::External => write!(f, "EXTERNAL"),
        }
    }
}

/// Per-phase timing breakdown for one control-loop cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleTimings {
    pub fieldbus_exchange: Duration,
    pub safety_check: Duration,
    pub control_step: Duration,
    pub total: Duration,
}

/// One axis's state as captured in a fault frame.
#[derive(Debug, Clone, Copy)]
pub struct AxisSnapshot {
    pub axis: Axis,
    pub snapshot: SlaveSnapshot,
    pub target_pulses: i64,
}

/// A single frame of fault recorder data: the complete state at one
/// control-loop cycle, kept for postmortem analysis.
#[derive(Debug, Clone, Default)]
pub struct FaultFrame {
    pub cycle: u64,
    pub timestamp_ns: u64,
    pub axes: Vec<AxisSnapshot>,
    pub timings: CycleTimings,
    pub wkc: Option<u16>,
    pub expected_wkc: Option<u16>,
    pub fault_reason: FaultReason,
    pub valid: bool,
}

impl FaultFrame {
    pub fn new(cycle: u64, timestamp_ns: u64, timings: CycleTimings) -> Self {
        Self {
            cycle,
            timestamp_ns,
            timings,
            valid: true,
            ..Default::default()
        }
    }

    pub fn set_axes(&mut self, axes: Vec<AxisSnapshot>) {
        self.axes = axes;
    }

    pub fn set_wkc(&mut self, actual: u16, expected: u16) {
        self.wkc = Some(actual);
        self.expected_wkc = Some(expected);
    }

    pub fn set_fault(&mut self, reason: FaultReason) {
        self.fault_reason = reason;
    }
}

/// Pre-allocated ring buffer for fault frame recording.
///
/// Captures system state at each cycle for postmortem diagnosis. When a
/// fault occurs, call `record_fault` (or `freeze`) to stop further
/// recording and preserve the fault context.
#[derive(Debug)]
pub struct FaultRecorder {
    frames: Box<[FaultFrame]>,
    write_pos: usize,
    frame_count: usize,
    start_time: std::time::Instant,
    frozen: bool,
    fault_frame_index: Option<usize>,
}

impl FaultRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let frames: Vec<FaultFrame> = (0..capacity).map(|_| FaultFrame::default()).collect();

        Self {
            frames: frames.into_boxed_slice(),
            write_pos: 0,
            frame_count: 0,
            start_time: std::time::Instant::now(),
            frozen: false,
            fault_frame_index: None,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_FAULT_FRAME_COUNT)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frame_count.min(self.frames.len())
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Record a normal cycle frame. Returns the frame reference for
    /// additional data population. `None` if the recorder is frozen.
    pub fn record_cycle(&mut self, cycle: u64, timings: CycleTimings) -> Option<&mut FaultFrame> {
        if self.frozen {
            return None;
        }

        let timestamp_ns = self.start_time.elapsed().as_nanos() as u64;
        let idx = self.write_pos;

        self.frames[idx] = FaultFrame::new(cycle, timestamp_ns, timings);

        self.write_pos = (self.write_pos + 1) % self.frames.len();
        self.frame_count = self.frame_count.saturating_add(1);

        Some(&mut self.frames[idx])
    }

    /// Record a fault and freeze the recorder. Creates a dedicated fault
    /// frame with the given cycle data so the fault is attributed to its
    /// own cycle rather than the previous one.
    pub fn record_fault(&mut self, cycle: u64, reason: FaultReason, timings: CycleTimings) {
        if self.frozen {
            return;
        }

        let timestamp_ns = self.start_time.elapsed().as_nanos() as u64;
        let idx = self.write_pos;

        self.frames[idx] = FaultFrame::new(cycle, timestamp_ns, timings);
        self.frames[idx].set_fault(reason);
        self.fault_frame_index = Some(idx);

        self.write_pos = (self.write_pos + 1) % self.frames.len();
        self.frame_count = self.frame_count.saturating_add(1);
        self.frozen = true;
    }

    /// Like `record_fault`, but also captures the per-axis snapshot for
    /// complete postmortem analysis.
    pub fn record_fault_with_axes(
        &mut self,
        cycle: u64,
        reason: FaultReason,
        timings: CycleTimings,
        axes: Vec<AxisSnapshot>,
    ) {
        if self.frozen {
            return;
        }

        let timestamp_ns = self.start_time.elapsed().as_nanos() as u64;
        let idx = self.write_pos;

        self.frames[idx] = FaultFrame::new(cycle, timestamp_ns, timings);
        self.frames[idx].set_axes(axes);
        self.frames[idx].set_fault(reason);
        self.fault_frame_index = Some(idx);

        self.write_pos = (self.write_pos + 1) % self.frames.len();
        self.frame_count = self.frame_count.saturating_add(1);
        self.frozen = true;
    }

    /// Freeze the recorder without recording a new fault frame. Use this
    /// when the fault was already recorded via `record_cycle`.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[must_use]
    pub fn fault_frame(&self) -> Option<&FaultFrame> {
        self.fault_frame_index.map(|idx| &self.frames[idx])
    }

    /// Iterate over recorded frames in chronological order (oldest first).
    pub fn frames_chronological(&self) -> impl Iterator<Item = &FaultFrame> {
        let count = self.frame_count();
        let cap = self.frames.len();

        let start = if self.frame_count > cap {
            self.write_pos
        } else {
            0
        };

        (0..count).map(move |i| {
            let idx = (start + i) % cap;
            &self.frames[idx]
        })
    }

    /// The N most recent frames before the fault, newest first.
    pub fn recent_frames(&self, count: usize) -> Vec<&FaultFrame> {
        let actual_count = count.min(self.frame_count());
        let cap = self.frames.len();

        (0..actual_count)
            .map(|i| {
                let idx = if self.write_pos == 0 {
                    cap - 1 - i
                } else {
                    (self.write_pos + cap - 1 - i) % cap
                };
                &self.frames[idx]
            })
            .filter(|f| f.valid)
            .collect()
    }

    pub fn reset(&mut self) {
        for frame in self.frames.iter_mut() {
            *frame = FaultFrame::default();
        }
        self.write_pos = 0;
        self.frame_count = 0;
        self.start_time = std::time::Instant::now();
        self.frozen = false;
        self.fault_frame_index = None;
    }

    #[must_use]
    pub fn fault_summary(&self) -> Option<FaultSummary> {
        let fault_frame = self.fault_frame()?;

        Some(FaultSummary {
            cycle: fault_frame.cycle,
            reason: fault_frame.fault_reason,
            execution_time: fault_frame.timings.total,
            fieldbus_exchange_time: fault_frame.timings.fieldbus_exchange,
            control_step_time: fault_frame.timings.control_step,
            wkc_mismatch: fault_frame
                .wkc
                .zip(fault_frame.expected_wkc)
                .map(|(actual, expected)| actual != expected)
                .unwrap_or(false),
            frames_available: self.frame_count(),
        })
    }
}

/// Summary of a recorded fault for logging.
#[derive(Debug, Clone)]
pub struct FaultSummary {
    pub cycle: u64,
    pub reason: FaultReason,
    pub execution_time: Duration,
    pub fieldbus_exchange_time: Duration,
    pub control_step_time: Duration,
    pub wkc_mismatch: bool,
    pub frames_available: usize,
}
