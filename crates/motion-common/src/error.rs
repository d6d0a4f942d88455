use thiserror::Error;

/// Error taxonomy for the motion controller, covering configuration, bootstrap,
/// and steady-state fault conditions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    /// Bad configuration: unknown adapter, requested slave count not discovered, etc.
    /// Raised at bootstrap; prevents start.
    #[error("configuration error: {0}")]
    Config(String),

    /// Adapter could not be opened after the configured retry budget.
    #[error("adapter open failed: {0}")]
    AdapterOpen(String),

    /// Fewer slaves were discovered on the bus than the configuration requires.
    #[error("slave count mismatch: expected {expected}, found {found}")]
    SlaveCountMismatch {
        /// Number of slaves the configuration requires.
        expected: usize,
        /// Number of slaves actually discovered.
        found: usize,
    },

    /// The network did not reach OP within the configured retry/poll budget.
    #[error("OP state transition timed out")]
    OpTransitionTimeout,

    /// An SDO write during bootstrap configuration failed.
    #[error("SDO write failed at {index:#06x}:{subindex}: {reason}")]
    SdoWriteFailed {
        /// Object dictionary index.
        index: u16,
        /// Object dictionary subindex.
        subindex: u8,
        /// Driver-reported failure reason.
        reason: String,
    },

    /// Generic fieldbus communication or exchange error.
    #[error("fieldbus error: {0}")]
    FieldbusError(String),

    /// A drive's CiA 402 fault bit is set.
    #[error("drive fault on slave {slave}")]
    DriveFault {
        /// Index of the faulted slave.
        slave: usize,
    },

    /// Inter-axis position mismatch exceeded the configured tolerance.
    #[error(
        "sync error between slave {slave_a} and {slave_b}: {diff_pulses} pulses (threshold {threshold_pulses})"
    )]
    SyncError {
        /// First slave in the offending pair.
        slave_a: usize,
        /// Second slave in the offending pair.
        slave_b: usize,
        /// Observed absolute position difference, in pulses.
        diff_pulses: i64,
        /// Configured threshold, in pulses.
        threshold_pulses: i64,
    },

    /// Watchdog timer expired without being kicked.
    #[error("watchdog timeout")]
    WatchdogTimeout,

    /// Cycle execution exceeded the configured deadline by more than the allowed slack.
    #[error("cycle overrun: expected {expected_ns}ns, actual {actual_ns}ns")]
    CycleOverrun {
        /// Expected cycle time in nanoseconds.
        expected_ns: u64,
        /// Actual cycle time in nanoseconds.
        actual_ns: u64,
    },

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// I/O operation error.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Too many consecutive PDO exchanges returned a working counter below
    /// the expected value.
    #[error("working counter threshold exceeded: {consecutive} consecutive errors (threshold {threshold})")]
    WkcThresholdExceeded {
        /// Consecutive cycles with a bad working counter.
        consecutive: u32,
        /// Configured threshold.
        threshold: u32,
    },
}

/// Convenience type alias for motion-controller operations.
pub type MotionResult<T> = Result<T, MotionError>;
