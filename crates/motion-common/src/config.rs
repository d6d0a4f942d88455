//! Configuration structures for the motion controller.
//!
//! Supports TOML deserialization with sensible defaults for development and
//! explicit values for production deployment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Cycle time for the control loop (typical 10 ms).
    #[serde(with = "humantime_serde")]
    pub cycle_time: Duration,

    /// Watchdog timeout (typically a small multiple of `cycle_time`).
    #[serde(with = "humantime_serde")]
    pub watchdog_timeout: Duration,

    /// Maximum allowed cycle overrun before the loop declares a fault.
    #[serde(with = "humantime_serde")]
    pub max_overrun: Duration,

    /// Bus-level configuration (adapter, slave count, DC sync).
    pub bus: BusConfig,

    /// Per-axis kinematic and motion-profile configuration, one entry per slave.
    pub axes: Vec<AxisConfig>,

    /// Cross-axis safety and coupling configuration.
    pub safety: SafetyConfig,

    /// Real-time scheduling configuration.
    pub realtime: RealtimeConfig,

    /// Bootstrap retry/backoff budget.
    pub bootstrap: BootstrapConfig,

    /// Metrics and diagnostics configuration.
    pub metrics: MetricsConfig,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            cycle_time: Duration::from_millis(10),
            watchdog_timeout: Duration::from_millis(40),
            max_overrun: Duration::from_millis(10),
            bus: BusConfig::default(),
            axes: Vec::new(),
            safety: SafetyConfig::default(),
            realtime: RealtimeConfig::default(),
            bootstrap: BootstrapConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// EtherCAT bus configuration, immutable once the control loop starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Adapter identifier (OS-specific packet-capture device path).
    /// Must be explicitly configured - no default to avoid opening the wrong interface.
    pub adapter: Option<String>,

    /// Number of CiA 402 slaves expected on the bus (1..=8).
    pub num_slaves: usize,

    /// Enable per-slave distributed-clock sync at the configured cycle period.
    pub dc_sync_enabled: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            num_slaves: 1,
            dc_sync_enabled: true,
        }
    }
}

/// Low-level EtherCAT master configuration, consumed by the fieldbus crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EthercatConfig {
    /// Network adapter identifier (e.g. an OS packet-capture device path).
    pub interface: Option<String>,

    /// Enable distributed-clocks sync0 programming on discovered slaves.
    pub dc_enabled: bool,

    /// DC sync0 cycle period; matches the control loop's cycle time.
    #[serde(with = "humantime_serde")]
    pub dc_sync0_cycle: Duration,

    /// Optional path to vendor ESI files (unused by the simulated transport).
    pub esi_path: Option<String>,

    /// Consecutive bad-working-counter cycles tolerated before the master
    /// declares a fieldbus fault. Zero disables the check.
    pub wkc_error_threshold: u32,
}

impl Default for EthercatConfig {
    fn default() -> Self {
        Self {
            interface: None,
            dc_enabled: true,
            dc_sync0_cycle: Duration::from_millis(10),
            esi_path: None,
            wkc_error_threshold: 5,
        }
    }
}

/// Linear axis identity, selecting the kinematic constant used for mm<->pulse
/// conversion (see [`crate::units`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Axis {
    /// Linear X axis (~11.9993 mm/rev).
    #[default]
    X,
    /// Linear Z axis (~5.9997 mm/rev).
    Z,
}

/// Per-slave motion-profile configuration, written via SDO before OP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    /// Which kinematic constant this slave uses.
    pub axis: Axis,

    /// Profile velocity, in RPM. Defaults to 60 RPM if unset (per the trajectory
    /// engine's natural-duration formula).
    pub profile_velocity_rpm: f64,

    /// Profile acceleration, in RPM/s.
    pub profile_accel_rpm_per_s: f64,

    /// Profile deceleration, in RPM/s.
    pub profile_decel_rpm_per_s: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            axis: Axis::X,
            profile_velocity_rpm: 60.0,
            profile_accel_rpm_per_s: 60.0,
            profile_decel_rpm_per_s: 60.0,
        }
    }
}

/// Cross-axis safety and cross-coupling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Maximum permitted inter-axis position mismatch, in millimeters
    /// (converted to pulses using the Z-axis kinematic constant).
    pub max_sync_error_mm: f64,

    /// Initial cross-coupling gain, clamped to `[0, 1]` at load time.
    pub coupling_gain: f64,

    /// Whether cross-coupling correction is active at start.
    pub coupling_enabled: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_sync_error_mm: 0.5,
            coupling_gain: 0.0,
            coupling_enabled: false,
        }
    }
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Enable real-time scheduling (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo", "rr", or "other".
    pub policy: SchedPolicy,

    /// Scheduler priority (1-99 for RT policies).
    pub priority: u8,

    /// CPU affinity for the control-loop thread.
    pub cpu_affinity: CpuAffinity,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,

    /// Pre-fault stack size in bytes.
    pub prefault_stack_size: usize,

    /// Fail immediately at startup if RT requirements cannot be met.
    pub fail_fast: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            priority: 90,
            cpu_affinity: CpuAffinity::None,
            lock_memory: true,
            prefault_stack_size: 8 * 1024 * 1024,
            fail_fast: false,
        }
    }
}

/// Scheduler policy for the real-time control-loop thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
    /// SCHED_OTHER: Normal time-sharing (non-RT).
    Other,
}

/// CPU affinity specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CpuAffinity {
    /// No affinity set (OS chooses).
    #[default]
    None,
    /// Pin to a single CPU core.
    Single(usize),
    /// Pin to a set of CPU cores.
    Set(Vec<usize>),
}

impl Serialize for CpuAffinity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            CpuAffinity::None => serializer.serialize_none(),
            CpuAffinity::Single(cpu) => serializer.serialize_u64(*cpu as u64),
            CpuAffinity::Set(cpus) => cpus.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CpuAffinity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct CpuAffinityVisitor;

        impl<'de> Visitor<'de> for CpuAffinityVisitor {
            type Value = CpuAffinity;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("null, an integer, or an array of integers")
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::Single(value as usize))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(de::Error::custom("CPU index cannot be negative"));
                }
                Ok(CpuAffinity::Single(value as usize))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut cpus = Vec::new();
                while let Some(cpu) = seq.next_element::<usize>()? {
                    cpus.push(cpu);
                }
                Ok(CpuAffinity::Set(cpus))
            }
        }

        deserializer.deserialize_any(CpuAffinityVisitor)
    }
}

/// Bootstrap retry/backoff budget (see §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Retries for adapter-open + slave-enumeration + SDO configuration.
    pub open_retries: u32,
    /// Backoff between open attempts.
    #[serde(with = "humantime_serde")]
    pub open_backoff: Duration,
    /// Retries for the OP-state transition handshake.
    pub op_retries: u32,
    /// Backoff between OP-transition attempts.
    #[serde(with = "humantime_serde")]
    pub op_backoff: Duration,
    /// How long to poll for OP within a single attempt.
    #[serde(with = "humantime_serde")]
    pub op_poll_timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            open_retries: 3,
            open_backoff: Duration::from_secs(1),
            op_retries: 3,
            op_backoff: Duration::from_millis(500),
            op_poll_timeout: Duration::from_secs(4),
        }
    }
}

/// Metrics and diagnostics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection.
    pub enabled: bool,
    /// Size of the cycle-time histogram ring buffer.
    pub histogram_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histogram_size: 10_000,
        }
    }
}

impl MotionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        /// Path to the configuration file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
