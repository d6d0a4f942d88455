//! Watchdog and fault handling acceptance tests.
//!
//! These tests verify that the system correctly detects faults and
//! transitions outputs to a safe state within acceptable time bounds.
//!
//! # Requirements
//!
//! - Root privileges (for RT priority)
//! - motion-daemon binary built
//!
//! # Acceptance Criteria
//!
//! - Outputs transition to safe state within 10ms of fault detection
//! - Watchdog timeout triggers fault state
//! - Cycle overruns are detected and reported
//! - System recovers cleanly from faults

#![allow(dead_code)] // Test utilities may not all be used in every test

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Simulated watchdog for testing purposes.
/// In production, this would interface with hardware watchdog.
pub struct TestWatchdog {
    /// Timeout period in microseconds.
    timeout_us: u64,
    /// Last kick timestamp (monotonic).
    last_kick: Instant,
    /// Whether the watchdog has triggered.
    triggered: AtomicBool,
    /// Time when triggered (if any).
    trigger_time: Option<Instant>,
}

impl TestWatchdog {
    /// Create a new watchdog with the specified timeout.
    pub fn new(timeout_us: u64) -> Self {
        Self {
            timeout_us,
            last_kick: Instant::now(),
            triggered: AtomicBool::new(false),
            trigger_time: None,
        }
    }

    /// Kick the watchdog to prevent timeout.
    pub fn kick(&mut self) {
        self.last_kick = Instant::now();
    }

    /// Check if watchdog has timed out.
    pub fn check(&mut self) -> bool {
        if self.triggered.load(Ordering::Relaxed) {
            return true;
        }

        let elapsed = self.last_kick.elapsed();
        if elapsed.as_micros() as u64 > self.timeout_us {
            self.triggered.store(true, Ordering::Relaxed);
            self.trigger_time = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Get time since trigger (if triggered).
    pub fn time_since_trigger(&self) -> Option<Duration> {
        self.trigger_time.map(|t| t.elapsed())
    }

    /// Reset the watchdog.
    pub fn reset(&mut self) {
        self.triggered.store(false, Ordering::Relaxed);
        self.trigger_time = None;
        self.last_kick = Instant::now();
    }
}

/// Simulated output state for testing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputState {
    /// Normal operation - outputs follow logic.
    Normal,
    /// Safe state - all outputs forced to safe values.
    Safe,
}

/// Simulated I/O image for fault testing.
pub struct TestIoImage {
    /// Digital outputs (8 bits).
    pub digital_outputs: u8,
    /// Analog outputs (2 channels, 16-bit each).
    pub analog_outputs: [u16; 2],
    /// Current output state.
    pub state: OutputState,
    /// Safe values for digital outputs.
    pub safe_digital: u8,
    /// Safe values for analog outputs.
    pub safe_analog: [u16; 2],
}

impl Default for TestIoImage {
    fn default() -> Self {
        Self {
            digital_outputs: 0,
            analog_outputs: [0; 2],
            state: OutputState::Normal,
            safe_digital: 0x00,  // All off
            safe_analog: [0; 2], // Zero output
        }
    }
}

impl TestIoImage {
    /// Transition to safe state.
    pub fn go_safe(&mut self) {
        self.state = OutputState::Safe;
        self.digital_outputs = self.safe_digital;
        self.analog_outputs = self.safe_analog;
    }

    /// Check if outputs are in safe state.
    pub fn is_safe(&self) -> bool {
        self.state == OutputState::Safe
            && self.digital_outputs == self.safe_digital
            && self.analog_outputs == self.safe_analog
    }
}

/// Fault types for injection testing.
#[derive(Debug, Clone, Copy)]
pub enum FaultType {
    /// Watchdog timeout (logic not executing).
    WatchdogTimeout,
    /// Cycle overrun (logic taking too long).
    CycleOverrun,
    /// Memory fault (simulated).
    MemoryFault,
    /// Fieldbus fault (communication lost).
    FieldbusFault,
}

/// Result of a fault injection test.
#[derive(Debug)]
pub struct FaultTestResult {
    /// Fault type tested.
    pub fault_type: FaultType,
    /// Time from fault injection to safe state (microseconds).
    pub response_time_us: u64,
    /// Whether the test passed criteria.
    pub passed: bool,
    /// Any notes about the test.
    pub notes: String,
}

/// Test watchdog timeout detection.
/// Verifies that when the watchdog is not kicked, it triggers and outputs go safe.
#[test]
#[ignore = "Requires real-time test environment"]
fn test_watchdog_timeout_detection() {
    println!("Testing watchdog timeout detection...");

    let watchdog_timeout_us = 5_000; // 5ms watchdog timeout
    let mut watchdog = TestWatchdog::new(watchdog_timeout_us);
    let mut io = TestIoImage {
        digital_outputs: 0xFF,
        analog_outputs: [32768, 16384],
        ..Default::default()
    };

    // Simulate normal operation for a few cycles
    for _ in 0..10 {
        watchdog.kick();
        thread::sleep(Duration::from_millis(1));
    }

    assert!(
        !watchdog.check(),
        "Watchdog should not trigger during normal operation"
    );

    // Now stop kicking and wait for timeout
    let fault_start = Instant::now();

    // Wait for watchdog to trigger
    while !watchdog.check() {
        thread::sleep(Duration::from_micros(100));
        if fault_start.elapsed().as_millis() > 100 {
            panic!("Watchdog did not trigger within expected time");
        }
    }

    // Watchdog triggered, transition to safe state
    let transition_start = Instant::now();
    io.go_safe();
    let transition_time = transition_start.elapsed();

    println!("  Watchdog triggered after: {:?}", fault_start.elapsed());
    println!("  Safe transition time: {:?}", transition_time);

    assert!(io.is_safe(), "Outputs should be in safe state");

    // Acceptance: transition should be < 10ms (we're simulating, so it's fast)
    assert!(
        transition_time.as_micros() < 10_000,
        "Safe transition took too long: {:?}",
        transition_time
    );

    println!("  PASSED: Watchdog timeout detection");
}

/// Test cycle overrun detection.
/// Verifies that cycles exceeding the deadline are detected.
#[test]
#[ignore = "Requires real-time test environment"]
fn test_cycle_overrun_detection() {
    println!("Testing cycle overrun detection...");

    let cycle_time_us = 1_000; // 1ms cycle time
    let overrun_threshold_us = 1_500; // 150% of cycle time

    let mut overrun_count = 0u64;
    let mut max_overrun_us = 0u64;

    let test_cycles = 100;

    for i in 0..test_cycles {
        let cycle_start = Instant::now();

        // Simulate varying cycle times
        let simulated_work_us = if i == 50 {
            2_000 // Force an overrun on cycle 50
        } else {
            800 // Normal cycle time
        };

        // Simulate work
        thread::sleep(Duration::from_micros(simulated_work_us));

        let elapsed_us = cycle_start.elapsed().as_micros() as u64;

        if elapsed_us > overrun_threshold_us {
            overrun_count += 1;
            let overrun_us = elapsed_us - cycle_time_us;
            if overrun_us > max_overrun_us {
                max_overrun_us = overrun_us;
            }
            println!(
                "  Cycle {} overrun: {}µs (elapsed: {}µs)",
                i, overrun_us, elapsed_us
            );
        }
    }

    println!("  Total overruns: {}", overrun_count);
    println!("  Max overrun: {}µs", max_overrun_us);

    assert!(
        overrun_count >= 1,
        "Should have detected at least one overrun"
    );

    println!("  PASSED: Cycle overrun detection");
}

/// Test fault recovery sequence.
/// Verifies that the system can recover from a fault and resume operation.
#[test]
#[ignore = "Requires real-time test environment"]
fn test_fault_recovery_sequence() {
    println!("Testing fault recovery sequence...");

    let mut watchdog = TestWatchdog::new(5_000);
    let mut io = TestIoImage {
        digital_outputs: 0xAA,
        analog_outputs: [10000, 20000],
        ..Default::default()
    };

    // Inject fault (stop kicking watchdog)
    thread::sleep(Duration::from_millis(10));
    assert!(watchdog.check(), "Watchdog should have triggered");

    // Go to safe state
    io.go_safe();
    assert!(io.is_safe(), "Should be in safe state");
    println!("  Entered safe state");

    // Simulate recovery sequence
    // 1. Reset watchdog
    watchdog.reset();
    assert!(!watchdog.check(), "Watchdog should be reset");
    println!("  Watchdog reset");

    // 2. Verify safe outputs are maintained during recovery
    assert!(io.is_safe(), "Outputs should remain safe during recovery");

    // 3. Resume normal operation
    io.state = OutputState::Normal;
    io.digital_outputs = 0x55; // New output pattern
    io.analog_outputs = [5000, 15000];

    // 4. Resume kicking watchdog
    for _ in 0..10 {
        watchdog.kick();
        thread::sleep(Duration::from_millis(1));
    }

    assert!(
        !watchdog.check(),
        "Watchdog should not trigger after recovery"
    );
    assert_eq!(
        io.state,
        OutputState::Normal,
        "Should be in normal operation"
    );
    println!("  Resumed normal operation");

    println!("  PASSED: Fault recovery sequence");
}

/// Test safe state transition timing.
/// Measures the time to transition all outputs to safe state.
#[test]
#[ignore = "Requires real-time test environment"]
fn test_safe_state_timing() {
    println!("Testing safe state transition timing...");

    const NUM_TESTS: usize = 100;
    let mut times_us: Vec<u64> = Vec::with_capacity(NUM_TESTS);

    for _ in 0..NUM_TESTS {
        let mut io = TestIoImage {
            digital_outputs: 0xFF,
            analog_outputs: [65535, 65535],
            ..Default::default()
        };

        let start = Instant::now();
        io.go_safe();
        let elapsed_us = start.elapsed().as_micros() as u64;

        times_us.push(elapsed_us);
    }

    times_us.sort();

    let min = times_us[0];
    let max = times_us[NUM_TESTS - 1];
    let avg: u64 = times_us.iter().sum::<u64>() / NUM_TESTS as u64;
    let p99 = times_us[(NUM_TESTS * 99) / 100];

    println!("  Safe transition timing ({}  tests):", NUM_TESTS);
    println!("    Min: {}µs", min);
    println!("    Avg: {}µs", avg);
    println!("    Max: {}µs", max);
    println!("    P99: {}µs", p99);

    // Acceptance: worst case < 10ms (10,000µs)
    assert!(
        max < 10_000,
        "Safe transition max time {} µs exceeds 10ms limit",
        max
    );

    println!("  PASSED: Safe state timing");
}

/// Test multiple fault types and their handling.
#[test]
#[ignore = "Requires real-time test environment"]
fn test_multiple_fault_types() {
    println!("Testing multiple fault types...");

    let fault_types = [
        FaultType::WatchdogTimeout,
        FaultType::CycleOverrun,
        FaultType::MemoryFault,
        FaultType::FieldbusFault,
    ];

    for fault_type in &fault_types {
        let mut io = TestIoImage {
            digital_outputs: 0xFF,
            analog_outputs: [32768, 32768],
            ..Default::default()
        };

        let start = Instant::now();

        // Simulate fault detection and response
        match fault_type {
            FaultType::WatchdogTimeout => {
                // Watchdog timeout - immediate safe transition
                io.go_safe();
            }
            FaultType::CycleOverrun => {
                // Cycle overrun - may allow a few more cycles before safe
                thread::sleep(Duration::from_micros(100));
                io.go_safe();
            }
            FaultType::MemoryFault => {
                // Memory fault - immediate safe transition
                io.go_safe();
            }
            FaultType::FieldbusFault => {
                // Fieldbus fault - attempt retry, then safe
                thread::sleep(Duration::from_micros(500)); // Retry window
                io.go_safe();
            }
        }

        let response_time_us = start.elapsed().as_micros() as u64;
        let passed = io.is_safe() && response_time_us < 10_000;

        let result = FaultTestResult {
            fault_type: *fault_type,
            response_time_us,
            passed,
            notes: if passed {
                "Within limits".to_string()
            } else {
                format!("Response time: {}µs", response_time_us)
            },
        };

        println!(
            "  {:?}: {}µs - {}",
            result.fault_type,
            result.response_time_us,
            if result.passed { "PASS" } else { "FAIL" }
        );

        assert!(result.passed, "Fault handling for {:?} failed", fault_type);
    }

    println!("  PASSED: All fault types handled correctly");
}

/// Test watchdog with varying timeouts.
/// Verifies watchdog works correctly across a range of timeout values.
#[test]
#[ignore = "Requires real-time test environment"]
fn test_watchdog_timeout_range() {
    println!("Testing watchdog timeout range...");

    let timeouts_us = [1_000, 5_000, 10_000, 50_000, 100_000]; // 1ms to 100ms

    for &timeout_us in &timeouts_us {
        let mut watchdog = TestWatchdog::new(timeout_us);

        // Verify watchdog doesn't trigger if kicked regularly
        for _ in 0..10 {
            watchdog.kick();
            let wait_time = timeout_us / 5; // Wait 20% of timeout
            thread::sleep(Duration::from_micros(wait_time));
            assert!(
                !watchdog.check(),
                "Watchdog should not trigger at {}µs timeout",
                timeout_us
            );
        }

        // Now let it timeout
        let start = Instant::now();
        while !watchdog.check() {
            thread::sleep(Duration::from_micros(100));
            if start.elapsed().as_micros() as u64 > timeout_us * 3 {
                panic!("Watchdog did not trigger within 3x timeout");
            }
        }

        let actual_timeout_us = start.elapsed().as_micros() as u64;
        let tolerance_us = timeout_us / 10; // 10% tolerance

        println!(
            "  Timeout {}µs: triggered at {}µs",
            timeout_us, actual_timeout_us
        );

        // Watchdog should trigger within tolerance of specified timeout
        assert!(
            actual_timeout_us >= timeout_us
                && actual_timeout_us <= timeout_us + tolerance_us + 1000,
            "Watchdog {}µs triggered at {}µs (outside tolerance)",
            timeout_us,
            actual_timeout_us
        );
    }

    println!("  PASSED: Watchdog timeout range");
}
