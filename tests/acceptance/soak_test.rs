//! Soak (long-duration stability) tests.
//!
//! These tests verify long-term system stability under sustained operation.
//! They check for memory leaks, accumulated errors, and performance degradation.
//!
//! # Requirements
//!
//! - Root privileges (for RT priority)
//! - Sufficient disk space for logs
//! - Stable test environment (no other heavy processes)
//!
//! # Acceptance Criteria
//!
//! - 168 hours (7 days) continuous operation without faults
//! - Memory usage stable (no leaks > 1MB/hour)
//! - Zero deadline overruns
//! - Consistent latency throughout test

#![allow(dead_code)] // Test utilities

use super::common::{get_memory_usage, LatencyStats, SoakResult};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for soak tests.
pub struct SoakConfig {
    /// Test duration.
    pub duration: Duration,
    /// Cycle time in microseconds.
    pub cycle_time_us: u64,
    /// How often to sample metrics (cycles).
    pub sample_interval_cycles: u64,
    /// How often to log progress (seconds).
    pub log_interval_secs: u64,
    /// Maximum allowed memory growth per hour (bytes).
    pub max_memory_growth_per_hour: u64,
    /// Maximum allowed faults.
    pub max_faults: u64,
    /// Output log file path.
    pub log_file: Option<String>,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60), // Default: 1 minute for quick tests
            cycle_time_us: 1_000,               // 1ms cycles
            sample_interval_cycles: 1000,       // Sample every 1000 cycles
            log_interval_secs: 60,              // Log every minute
            max_memory_growth_per_hour: 1024 * 1024, // 1MB/hour
            max_faults: 0,
            log_file: None,
        }
    }
}

impl SoakConfig {
    /// Create config for a short test (1 minute).
    pub fn short() -> Self {
        Self {
            duration: Duration::from_secs(60),
            ..Default::default()
        }
    }

    /// Create config for a medium test (1 hour).
    pub fn medium() -> Self {
        Self {
            duration: Duration::from_secs(3600),
            log_interval_secs: 300, // Log every 5 minutes
            ..Default::default()
        }
    }

    /// Create config for a long test (24 hours).
    pub fn long() -> Self {
        Self {
            duration: Duration::from_secs(24 * 3600),
            log_interval_secs: 600, // Log every 10 minutes
            ..Default::default()
        }
    }

    /// Create config for the full acceptance test (168 hours / 7 days).
    pub fn full_acceptance() -> Self {
        Self {
            duration: Duration::from_secs(168 * 3600),
            log_interval_secs: 3600, // Log every hour
            log_file: Some("/tmp/soak_test.log".to_string()),
            ..Default::default()
        }
    }
}

/// Metrics collected during soak test.
#[derive(Debug, Clone, Default)]
pub struct SoakMetrics {
    /// Total cycles executed.
    pub total_cycles: u64,
    /// Number of faults detected.
    pub faults: u64,
    /// Number of cycle overruns.
    pub overruns: u64,
    /// Minimum cycle time in microseconds.
    pub min_cycle_us: u64,
    /// Maximum cycle time in microseconds.
    pub max_cycle_us: u64,
    /// Sum of cycle times for average calculation.
    pub sum_cycle_us: u64,
    /// Initial memory usage in bytes.
    pub initial_memory: u64,
    /// Current memory usage in bytes.
    pub current_memory: u64,
    /// Peak memory usage in bytes.
    pub peak_memory: u64,
}

impl SoakMetrics {
    /// Calculate average cycle time.
    pub fn avg_cycle_us(&self) -> u64 {
        if self.total_cycles > 0 {
            self.sum_cycle_us / self.total_cycles
        } else {
            0
        }
    }

    /// Calculate memory growth in bytes.
    pub fn memory_growth(&self) -> i64 {
        self.current_memory as i64 - self.initial_memory as i64
    }
}

/// Simulated control cycle for soak testing.
/// In production, this would be the actual control loop cycle.
fn simulate_control_cycle(cycle_count: u64) -> Result<Duration, &'static str> {
    let start = Instant::now();

    // Simulate some work
    let work_us = 500 + (cycle_count % 100) as u64; // Varying workload
    thread::sleep(Duration::from_micros(work_us));

    // Occasionally simulate a slow cycle (but not a fault)
    if cycle_count % 10000 == 9999 {
        thread::sleep(Duration::from_micros(200));
    }

    // Very rarely simulate a fault (for testing fault detection)
    if cycle_count == u64::MAX {
        // Never actually fault in simulation
        return Err("simulated fault");
    }

    Ok(start.elapsed())
}

/// Run a soak test with the given configuration.
pub fn run_soak_test(config: &SoakConfig) -> SoakResult {
    let mut metrics = SoakMetrics::default();
    metrics.initial_memory = get_memory_usage();
    metrics.current_memory = metrics.initial_memory;
    metrics.peak_memory = metrics.initial_memory;
    metrics.min_cycle_us = u64::MAX;

    let test_start = Instant::now();
    let mut last_log = Instant::now();
    let mut log_file: Option<File> = config.log_file.as_ref().map(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("Failed to open log file")
    });

    // Log header
    if let Some(ref mut f) = log_file {
        writeln!(f, "Soak test started at {:?}", std::time::SystemTime::now()).ok();
        writeln!(f, "Duration: {:?}", config.duration).ok();
        writeln!(f, "Cycle time: {}µs", config.cycle_time_us).ok();
        writeln!(f, "---").ok();
    }

    println!("Starting soak test...");
    println!("  Duration: {:?}", config.duration);
    println!("  Cycle time: {}µs", config.cycle_time_us);

    while test_start.elapsed() < config.duration {
        // Execute one cycle
        match simulate_control_cycle(metrics.total_cycles) {
            Ok(elapsed) => {
                let elapsed_us = elapsed.as_micros() as u64;
                metrics.total_cycles += 1;
                metrics.sum_cycle_us += elapsed_us;

                if elapsed_us < metrics.min_cycle_us {
                    metrics.min_cycle_us = elapsed_us;
                }
                if elapsed_us > metrics.max_cycle_us {
                    metrics.max_cycle_us = elapsed_us;
                }

                // Check for overrun
                if elapsed_us > config.cycle_time_us * 2 {
                    metrics.overruns += 1;
                }
            }
            Err(_) => {
                metrics.faults += 1;
            }
        }

        // Sample memory periodically
        if metrics.total_cycles % config.sample_interval_cycles == 0 {
            metrics.current_memory = get_memory_usage();
            if metrics.current_memory > metrics.peak_memory {
                metrics.peak_memory = metrics.current_memory;
            }
        }

        // Log progress periodically
        if last_log.elapsed().as_secs() >= config.log_interval_secs {
            let elapsed = test_start.elapsed();
            let progress = (elapsed.as_secs_f64() / config.duration.as_secs_f64()) * 100.0;

            let log_line = format!(
                "[{:.1}%] cycles={}, faults={}, overruns={}, avg={}µs, max={}µs, mem={:.1}MB",
                progress,
                metrics.total_cycles,
                metrics.faults,
                metrics.overruns,
                metrics.avg_cycle_us(),
                metrics.max_cycle_us,
                metrics.current_memory as f64 / (1024.0 * 1024.0)
            );

            println!("  {}", log_line);
            if let Some(ref mut f) = log_file {
                writeln!(f, "{}", log_line).ok();
            }

            last_log = Instant::now();
        }
    }

    let test_duration = test_start.elapsed();
    let hours = test_duration.as_secs_f64() / 3600.0;
    let memory_growth_per_hour = if hours > 0.0 {
        (metrics.memory_growth() as f64 / hours) as u64
    } else {
        0
    };

    // Convert to SoakResult
    let latency = LatencyStats {
        min_us: metrics.min_cycle_us,
        avg_us: metrics.avg_cycle_us(),
        max_us: metrics.max_cycle_us,
        overruns: metrics.overruns,
        ..Default::default()
    };

    let passed = metrics.faults <= config.max_faults
        && metrics.overruns == 0
        && memory_growth_per_hour <= config.max_memory_growth_per_hour;

    let result = SoakResult {
        duration: test_duration,
        total_cycles: metrics.total_cycles,
        faults: metrics.faults,
        peak_memory_bytes: metrics.peak_memory,
        latency,
        passed,
    };

    // Log summary
    println!("\nSoak test completed:");
    println!("  Duration: {:?}", result.duration);
    println!("  Cycles: {}", result.total_cycles);
    println!("  Faults: {}", result.faults);
    println!("  Overruns: {}", metrics.overruns);
    println!("  Latency: min={}µs avg={}µs max={}µs",
        metrics.min_cycle_us, metrics.avg_cycle_us(), metrics.max_cycle_us);
    println!("  Memory: initial={:.1}MB peak={:.1}MB growth={:.1}KB/hour",
        metrics.initial_memory as f64 / (1024.0 * 1024.0),
        metrics.peak_memory as f64 / (1024.0 * 1024.0),
        memory_growth_per_hour as f64 / 1024.0);
    println!("  Result: {}", if result.passed { "PASSED" } else { "FAILED" });

    if let Some(ref mut f) = log_file {
        writeln!(f, "---").ok();
        writeln!(f, "Test completed: {}", if result.passed { "PASSED" } else { "FAILED" }).ok();
    }

    result
}

/// Short soak test (1 minute) - quick sanity check.
#[test]
#[ignore = "Soak test - takes 1 minute"]
fn test_soak_short() {
    let config = SoakConfig::short();
    let result = run_soak_test(&config);
    assert!(result.passed, "Short soak test failed");
}

/// Medium soak test (1 hour) - development validation.
#[test]
#[ignore = "Soak test - takes 1 hour"]
fn test_soak_medium() {
    let config = SoakConfig::medium();
    let result = run_soak_test(&config);
    assert!(result.passed, "Medium soak test failed");
}

/// Long soak test (24 hours) - pre-release validation.
#[test]
#[ignore = "Soak test - takes 24 hours"]
fn test_soak_long() {
    let config = SoakConfig::long();
    let result = run_soak_test(&config);
    assert!(result.passed, "Long soak test failed");
}

/// Full acceptance soak test (168 hours / 7 days).
#[test]
#[ignore = "Soak test - takes 7 days"]
fn test_soak_full_acceptance() {
    let config = SoakConfig::full_acceptance();
    let result = run_soak_test(&config);

    assert!(result.passed,
        "Full acceptance soak test failed: faults={}, overruns={}",
        result.faults, result.latency.overruns);

    // Additional acceptance criteria
    assert_eq!(result.faults, 0, "Zero faults required for acceptance");
    assert_eq!(result.latency.overruns, 0, "Zero overruns required for acceptance");
}

/// Test memory stability during soak.
/// Verifies no memory leaks over a short period.
#[test]
#[ignore = "Memory stability test - takes 5 minutes"]
fn test_memory_stability() {
    let config = SoakConfig {
        duration: Duration::from_secs(300), // 5 minutes
        sample_interval_cycles: 100,         // Sample frequently
        log_interval_secs: 60,
        max_memory_growth_per_hour: 512 * 1024, // Strict: 512KB/hour
        ..Default::default()
    };

    let result = run_soak_test(&config);

    // Allow some growth but flag significant leaks
    assert!(result.passed,
        "Memory stability test failed - potential memory leak detected");
}

/// Test cycle time consistency during extended run.
#[test]
#[ignore = "Cycle consistency test - takes 2 minutes"]
fn test_cycle_consistency() {
    let config = SoakConfig {
        duration: Duration::from_secs(120), // 2 minutes
        cycle_time_us: 1_000,                // 1ms target
        sample_interval_cycles: 100,
        log_interval_secs: 30,
        ..Default::default()
    };

    let result = run_soak_test(&config);

    // Check that max cycle time is reasonable (< 5x target)
    assert!(
        result.latency.max_us < config.cycle_time_us * 5,
        "Cycle time too variable: max={}µs, target={}µs",
        result.latency.max_us,
        config.cycle_time_us
    );

    assert!(result.passed, "Cycle consistency test failed");
}
