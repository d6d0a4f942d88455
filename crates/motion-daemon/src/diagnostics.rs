//! Diagnostics and health check module for the motion-controller daemon.
//!
//! Provides runtime health monitoring, metrics export, and diagnostic
//! information for external monitoring systems (e.g. Prometheus), and is
//! the concrete mechanism behind "process death: clients observe by
//! polling liveness" (§7): an external poller reads this state, not the
//! control loop directly.

use motion_common::diagnostics::LoopTelemetry;
use motion_common::metrics::CycleMetrics;
use motion_common::state::RuntimeState;
use std::sync::Arc;
use std::time::Duration;

/// Health status of the motion-controller runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// System is healthy and operating normally.
    Healthy,
    /// System is degraded but still operational.
    Degraded,
    /// System is unhealthy or in fault state.
    Unhealthy,
    /// System is starting up.
    Starting,
    /// System is shutting down.
    ShuttingDown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Starting => write!(f, "starting"),
            HealthStatus::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Snapshot of runtime diagnostics at a point in time.
#[derive(Debug, Clone)]
pub struct DiagnosticsSnapshot {
    /// Current health status.
    pub health: HealthStatus,
    /// Current runtime state.
    pub state: RuntimeState,
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Number of cycle overruns.
    pub overrun_count: u64,
    /// Uptime since daemon start.
    pub uptime: Duration,
    /// Last cycle execution time.
    pub last_cycle_time: Option<Duration>,
    /// Average cycle time (if available).
    pub avg_cycle_time: Option<Duration>,
    /// Maximum cycle time observed.
    pub max_cycle_time: Option<Duration>,
    /// Whether the fieldbus master is in OP with a live PDO exchange.
    pub fieldbus_connected: bool,
    /// Number of axes with a currently active trajectory.
    pub moving_axes: usize,
}

/// Diagnostics collector that aggregates runtime information. Wraps the
/// [`LoopTelemetry`] the control loop updates each cycle; the daemon never
/// writes to it directly, only reads it for status logging and the
/// Prometheus endpoint.
pub struct DiagnosticsCollector {
    telemetry: Arc<LoopTelemetry>,
}

impl DiagnosticsCollector {
    /// Create a new diagnostics collector over a shared telemetry handle.
    pub fn new(telemetry: Arc<LoopTelemetry>) -> Self {
        Self { telemetry }
    }

    /// Determine health status from runtime state.
    pub fn health_from_state(&self, runtime_state: RuntimeState) -> HealthStatus {
        match runtime_state {
            RuntimeState::Boot | RuntimeState::Init | RuntimeState::PreOp => HealthStatus::Starting,
            RuntimeState::Run => {
                let overrun_rate = if self.telemetry.cycle_count() > 0 {
                    self.telemetry.overrun_count() as f64 / self.telemetry.cycle_count() as f64
                } else {
                    0.0
                };

                if overrun_rate > 0.01 {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
            RuntimeState::SafeStop => HealthStatus::ShuttingDown,
            RuntimeState::Fault => HealthStatus::Unhealthy,
        }
    }

    /// Create a snapshot of current diagnostics.
    pub fn snapshot(&self, runtime_state: RuntimeState, metrics: &CycleMetrics) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            health: self.health_from_state(runtime_state),
            state: runtime_state,
            cycle_count: self.telemetry.cycle_count(),
            overrun_count: self.telemetry.overrun_count(),
            uptime: self.telemetry.uptime(),
            last_cycle_time: self.telemetry.last_cycle_time(),
            avg_cycle_time: metrics.mean(),
            max_cycle_time: metrics.max(),
            fieldbus_connected: self.telemetry.is_fieldbus_connected(),
            moving_axes: self.telemetry.moving_axes(),
        }
    }

    /// Get the underlying telemetry handle.
    pub fn telemetry(&self) -> &Arc<LoopTelemetry> {
        &self.telemetry
    }
}

/// Format metrics for Prometheus text exposition format.
pub fn format_prometheus_metrics(snapshot: &DiagnosticsSnapshot, target_cycle_ns: u64) -> String {
    let mut output = String::new();

    output.push_str("# HELP motion_health Motion controller health status (1=healthy, 0=not healthy)\n");
    output.push_str("# TYPE motion_health gauge\n");
    output.push_str(&format!(
        "motion_health {{status=\"{}\"}} {}\n",
        snapshot.health,
        if snapshot.health == HealthStatus::Healthy { 1 } else { 0 }
    ));

    output.push_str("# HELP motion_state Current runtime state\n");
    output.push_str("# TYPE motion_state gauge\n");
    output.push_str(&format!("motion_state {{state=\"{}\"}} 1\n", snapshot.state));

    output.push_str("# HELP motion_cycles_total Total control-loop cycles executed\n");
    output.push_str("# TYPE motion_cycles_total counter\n");
    output.push_str(&format!("motion_cycles_total {}\n", snapshot.cycle_count));

    output.push_str("# HELP motion_overruns_total Total cycle overruns\n");
    output.push_str("# TYPE motion_overruns_total counter\n");
    output.push_str(&format!("motion_overruns_total {}\n", snapshot.overrun_count));

    output.push_str("# HELP motion_uptime_seconds Daemon uptime in seconds\n");
    output.push_str("# TYPE motion_uptime_seconds gauge\n");
    output.push_str(&format!("motion_uptime_seconds {:.3}\n", snapshot.uptime.as_secs_f64()));

    if let Some(last) = snapshot.last_cycle_time {
        output.push_str("# HELP motion_cycle_time_seconds Last cycle execution time\n");
        output.push_str("# TYPE motion_cycle_time_seconds gauge\n");
        output.push_str(&format!("motion_cycle_time_seconds {:.9}\n", last.as_secs_f64()));
    }

    if let Some(avg) = snapshot.avg_cycle_time {
        output.push_str("# HELP motion_cycle_time_avg_seconds Average cycle execution time\n");
        output.push_str("# TYPE motion_cycle_time_avg_seconds gauge\n");
        output.push_str(&format!("motion_cycle_time_avg_seconds {:.9}\n", avg.as_secs_f64()));
    }

    if let Some(max) = snapshot.max_cycle_time {
        output.push_str("# HELP motion_cycle_time_max_seconds Maximum cycle execution time\n");
        output.push_str("# TYPE motion_cycle_time_max_seconds gauge\n");
        output.push_str(&format!("motion_cycle_time_max_seconds {:.9}\n", max.as_secs_f64()));
    }

    output.push_str("# HELP motion_cycle_time_target_seconds Target cycle time\n");
    output.push_str("# TYPE motion_cycle_time_target_seconds gauge\n");
    output.push_str(&format!(
        "motion_cycle_time_target_seconds {:.9}\n",
        Duration::from_nanos(target_cycle_ns).as_secs_f64()
    ));

    output.push_str("# HELP motion_fieldbus_connected Fieldbus connection status\n");
    output.push_str("# TYPE motion_fieldbus_connected gauge\n");
    output.push_str(&format!(
        "motion_fieldbus_connected {}\n",
        if snapshot.fieldbus_connected { 1 } else { 0 }
    ));

    output.push_str("# HELP motion_axes_moving Axes currently executing a trajectory\n");
    output.push_str("# TYPE motion_axes_moving gauge\n");
    output.push_str(&format!("motion_axes_moving {}\n", snapshot.moving_axes));

    output
}
