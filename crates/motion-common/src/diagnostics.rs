//! Shared runtime telemetry, updated by the control loop once per cycle and
//! read by anything polling for liveness (the daemon's diagnostics endpoint,
//! a future supervisor). Lives here rather than in `motion-runtime` so a
//! binary can hold a handle without depending on the control loop itself.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomics-backed cycle telemetry, safe to share across threads without a lock.
#[derive(Debug)]
pub struct LoopTelemetry {
    cycle_count: AtomicU64,
    overrun_count: AtomicU64,
    last_cycle_ns: AtomicU64,
    fieldbus_connected: AtomicBool,
    moving_axes: AtomicU64,
    start_time: Instant,
}

impl Default for LoopTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cycle_count: AtomicU64::new(0),
            overrun_count: AtomicU64::new(0),
            last_cycle_ns: AtomicU64::new(0),
            fieldbus_connected: AtomicBool::new(false),
            moving_axes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_cycle(&self, execution_time: Duration, overrun: bool) {
        self.cycle_count.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_ns
            .store(execution_time.as_nanos() as u64, Ordering::Relaxed);
        if overrun {
            self.overrun_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_fieldbus_connected(&self, connected: bool) {
        self.fieldbus_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_moving_axes(&self, count: usize) {
        self.moving_axes.store(count as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    #[must_use]
    pub fn last_cycle_time(&self) -> Option<Duration> {
        let ns = self.last_cycle_ns.load(Ordering::Relaxed);
        (ns > 0).then(|| Duration::from_nanos(ns))
    }

    #[must_use]
    pub fn is_fieldbus_connected(&self) -> bool {
        self.fieldbus_connected.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn moving_axes(&self) -> usize {
        self.moving_axes.load(Ordering::Relaxed) as usize
    }
}
