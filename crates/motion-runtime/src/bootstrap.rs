//! Bootstrap (C9): slave enumeration, CiA 402 CSP-mode SDO preconditions,
//! and the OP-state handshake, each under its own retry budget (§4.9). On
//! success every slot's `target_pulses` is seeded from the first
//! actual-position read, which is what prevents the first steady-state PDO
//! cycle from commanding 0 and tripping a following error.
//!
//! The caller owns adapter selection: it constructs the [`EthercatMaster`]
//! with whichever transport fits (simulated, or the real SOEM backend
//! behind the `soem` feature) and hands it to [`bootstrap`]. Retries within
//! a stage reuse that same master rather than tearing down and reopening
//! the adapter, since the transport abstraction has no generic "reopen".

use motion_common::config::{AxisConfig, MotionConfig};
use motion_common::drive::DriveSlot;
use motion_common::error::{MotionError, MotionResult};
use motion_common::units::rpm_to_pps;
use motion_fieldbus::slave_config::{cia402_sdo, SdoRequest};
use motion_fieldbus::EthercatMaster;
use std::thread::sleep;
use std::time::Instant;
use tracing::{info, warn};

/// Everything the control loop needs to enter its steady-state cycle.
#[derive(Debug)]
pub struct BootstrapOutcome {
    pub master: EthercatMaster,
    pub slots: Vec<DriveSlot>,
}

/// Runs the full bootstrap handshake on `master`, retrying each stage per
/// `config.bootstrap`'s budget.
pub fn bootstrap(mut master: EthercatMaster, config: &MotionConfig) -> MotionResult<BootstrapOutcome> {
    scan_and_configure_with_retries(&mut master, config)?;
    let num_slaves = master.network().slave_count();

    enter_op_with_retries(&mut master, config, num_slaves)?;

    let mut slots: Vec<DriveSlot> = config
        .axes
        .iter()
        .map(make_slot)
        .chain(std::iter::repeat_with(|| DriveSlot::new(motion_common::config::Axis::X)))
        .take(num_slaves)
        .collect();

    master.exchange()?;
    for (i, slot) in slots.iter_mut().enumerate() {
        if let Some((_status, actual)) = master.read_slave_input(i) {
            slot.target_pulses = actual as i64;
        }
    }

    info!(num_slaves, "bootstrap complete, entering steady state");
    Ok(BootstrapOutcome { master, slots })
}

fn make_slot(axis_cfg: &AxisConfig) -> DriveSlot {
    let mut slot = DriveSlot::new(axis_cfg.axis);
    slot.profile_velocity_pps = rpm_to_pps(axis_cfg.profile_velocity_rpm);
    slot.profile_accel_pps2 = rpm_to_pps(axis_cfg.profile_accel_rpm_per_s);
    slot.profile_decel_pps2 = rpm_to_pps(axis_cfg.profile_decel_rpm_per_s);
    slot
}

/// Slave enumeration + SDO configuration, retried as one unit up to
/// `bootstrap.open_retries` times (§4.9).
fn scan_and_configure_with_retries(master: &mut EthercatMaster, config: &MotionConfig) -> MotionResult<()> {
    let mut last_err = None;

    for attempt in 1..=config.bootstrap.open_retries.max(1) {
        match scan_and_configure(master, config) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, error = %e, "bootstrap scan/configure attempt failed");
                last_err = Some(e);
                if attempt < config.bootstrap.open_retries.max(1) {
                    sleep(config.bootstrap.open_backoff);
                }
            }
        }
    }

    Err(last_err.unwrap_or(MotionError::AdapterOpen("no attempts made".into())))
}

fn scan_and_configure(master: &mut EthercatMaster, config: &MotionConfig) -> MotionResult<()> {
    let found = master.scan_slaves()?;
    if found != config.bus.num_slaves {
        return Err(MotionError::SlaveCountMismatch {
            expected: config.bus.num_slaves,
            found,
        });
    }

    master.configure_csp_pdo_map(found);
    write_csp_preconditions(master, found, &config.axes)?;
    master.configure_slaves()?;
    master.configure_dc()?;
    Ok(())
}

/// Writes the CiA 402 CSP-mode SDO preconditions for every slave (§4.1):
/// vendor absolute-position bit, mode-of-operation 8 (CSP), profile
/// velocity/accel/decel, and the widened following-error/position windows
/// that keep the drive's own fault detection from tripping on CSP's large
/// instantaneous following error at cycle 0 (§9).
fn write_csp_preconditions(
    master: &mut EthercatMaster,
    num_slaves: usize,
    axes: &[AxisConfig],
) -> MotionResult<()> {
    for slave in 0..num_slaves {
        let axis_cfg = axes.get(slave);
        let velocity_pps = axis_cfg.map_or(0, |a| rpm_to_pps(a.profile_velocity_rpm));
        let accel_pps2 = axis_cfg.map_or(0, |a| rpm_to_pps(a.profile_accel_rpm_per_s));
        let decel_pps2 = axis_cfg.map_or(0, |a| rpm_to_pps(a.profile_decel_rpm_per_s));

        write_sdo_u32(
            master,
            slave,
            cia402_sdo::VENDOR_POSITION_MODE,
            cia402_sdo::VENDOR_POSITION_MODE_BIT,
        )?;
        write_sdo_i8(master, slave, cia402_sdo::MODES_OF_OPERATION, cia402_sdo::MODE_CSP)?;
        write_sdo_u32(master, slave, cia402_sdo::PROFILE_VELOCITY, velocity_pps as u32)?;
        write_sdo_u32(master, slave, cia402_sdo::PROFILE_ACCELERATION, accel_pps2 as u32)?;
        write_sdo_u32(master, slave, cia402_sdo::PROFILE_DECELERATION, decel_pps2 as u32)?;
        write_sdo_u32(
            master,
            slave,
            cia402_sdo::FOLLOWING_ERROR_WINDOW,
            cia402_sdo::WIDENED_ERROR_WINDOW_PULSES,
        )?;
        write_sdo_u32(
            master,
            slave,
            cia402_sdo::POSITION_WINDOW,
            cia402_sdo::WIDENED_ERROR_WINDOW_PULSES,
        )?;
    }
    Ok(())
}

fn write_sdo_u32(
    master: &mut EthercatMaster,
    slave: usize,
    addr: motion_fieldbus::slave_config::SdoAddress,
    value: u32,
) -> MotionResult<()> {
    master.sdo_write(&SdoRequest::write(
        slave as u16,
        addr.index,
        addr.subindex,
        value.to_le_bytes().to_vec(),
    ))
}

fn write_sdo_i8(
    master: &mut EthercatMaster,
    slave: usize,
    addr: motion_fieldbus::slave_config::SdoAddress,
    value: i8,
) -> MotionResult<()> {
    master.sdo_write(&SdoRequest::write(
        slave as u16,
        addr.index,
        addr.subindex,
        vec![value as u8],
    ))
}

/// SAFE-OP → OP transition, retried up to `bootstrap.op_retries` times with
/// `op_backoff` between attempts; each attempt polls for up to
/// `op_poll_timeout` for every slave to report Operation-Enabled.
fn enter_op_with_retries(
    master: &mut EthercatMaster,
    config: &MotionConfig,
    num_slaves: usize,
) -> MotionResult<()> {
    for attempt in 1..=config.bootstrap.op_retries.max(1) {
        master.enter_safe_op()?;
        master.enter_op()?;

        match poll_until_operation_enabled(master, num_slaves, config.bootstrap.op_poll_timeout) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, error = %e, "OP-transition attempt failed");
                if attempt < config.bootstrap.op_retries.max(1) {
                    sleep(config.bootstrap.op_backoff);
                }
            }
        }
    }

    Err(MotionError::OpTransitionTimeout)
}

fn poll_until_operation_enabled(
    master: &mut EthercatMaster,
    num_slaves: usize,
    timeout: std::time::Duration,
) -> MotionResult<()> {
    let start = Instant::now();

    while start.elapsed() < timeout {
        master.exchange()?;

        let mut all_enabled = true;
        for slave in 0..num_slaves {
            let Some((status, _actual)) = master.read_slave_input(slave) else {
                all_enabled = false;
                continue;
            };
            let (state, controlword) = motion_common::cia402::next_controlword(status);
            master.write_slave_output(slave, controlword, 0);
            if state != motion_common::cia402::DriveState::OperationEnabled {
                all_enabled = false;
            }
        }

        if all_enabled {
            return Ok(());
        }
    }

    Err(MotionError::OpTransitionTimeout)
}
