//! Test-only EtherCAT transport that actually walks the CiA 402 state
//! machine in response to received controlwords, instead of the generic
//! byte-echo simulation in `motion_fieldbus::SimulatedTransport`. Shared by
//! the bootstrap and control-loop test modules, both of which need slaves
//! that genuinely reach Operation-Enabled.

use motion_common::cia402::{
    SW_OPERATION_ENABLED, SW_READY_TO_SWITCH_ON, SW_SWITCHED_ON, SW_SWITCH_ON_DISABLED,
};
use motion_common::error::MotionResult;
use motion_fieldbus::slave_config::{
    PdoEntry, PdoMapping, SdoRequest, SlaveConfig, SlaveIdentity, SlaveState,
};
use motion_fieldbus::{DcSlaveConfig, EthercatTransport};

#[derive(Debug, Clone, Copy)]
struct SimulatedDrive {
    state: u16,
    actual_pulses: i32,
}

impl Default for SimulatedDrive {
    fn default() -> Self {
        Self {
            state: SW_SWITCH_ON_DISABLED,
            actual_pulses: 0,
        }
    }
}

impl SimulatedDrive {
    fn next_state(self, controlword: u16) -> u16 {
        match (self.state, controlword) {
            (SW_SWITCH_ON_DISABLED, 0x0006) => SW_READY_TO_SWITCH_ON,
            (SW_READY_TO_SWITCH_ON, 0x0007) => SW_SWITCHED_ON,
            (SW_SWITCHED_ON, 0x000F) => SW_OPERATION_ENABLED,
            (SW_OPERATION_ENABLED, 0x0007) => SW_SWITCHED_ON,
            (SW_SWITCHED_ON, 0x0006) => SW_READY_TO_SWITCH_ON,
            (_, 0x0000) => SW_SWITCH_ON_DISABLED,
            (_, 0x0080) => SW_READY_TO_SWITCH_ON,
            (state, _) => state,
        }
    }
}

pub(crate) struct SimulatedCspTransport {
    slaves: Vec<SlaveConfig>,
    drives: Vec<SimulatedDrive>,
    cycle: u64,
}

pub(crate) fn csp_slave(position: u16) -> SlaveConfig {
    let mut slave = SlaveConfig::new(position, SlaveIdentity::new(0x2, 0x1234, 1, 0));
    slave.name = format!("CSP axis {position}");
    slave.dc_supported = true;
    let mut tx_pdo = PdoMapping::new(0x1A00, true);
    tx_pdo.add_entry(PdoEntry::new(0x6041, 0, 16).with_name("Statusword"));
    tx_pdo.add_entry(PdoEntry::new(0x6064, 0, 32).with_name("Actual position"));
    slave.tx_pdos.push(tx_pdo);
    let mut rx_pdo = PdoMapping::new(0x1600, false);
    rx_pdo.add_entry(PdoEntry::new(0x6040, 0, 16).with_name("Controlword"));
    rx_pdo.add_entry(PdoEntry::new(0x607A, 0, 32).with_name("Target position"));
    slave.rx_pdos.push(rx_pdo);
    slave
}

impl SimulatedCspTransport {
    pub(crate) fn new(num_slaves: usize) -> Self {
        Self {
            slaves: (0..num_slaves as u16).map(csp_slave).collect(),
            drives: vec![SimulatedDrive::default(); num_slaves],
            cycle: 0,
        }
    }
}

impl EthercatTransport for SimulatedCspTransport {
    fn scan_slaves(&mut self) -> MotionResult<Vec<SlaveConfig>> {
        Ok(self.slaves.clone())
    }

    fn set_state(&mut self, _state: SlaveState) -> MotionResult<()> {
        Ok(())
    }

    fn configure_slave_dc(&mut self, _config: &DcSlaveConfig) -> MotionResult<()> {
        Ok(())
    }

    fn read_dc_time(&mut self) -> MotionResult<u64> {
        self.cycle += 1;
        Ok(self.cycle * 10_000_000)
    }

    fn exchange(&mut self, outputs: &[u8], inputs: &mut [u8]) -> MotionResult<u16> {
        const STRIDE: usize = 6;
        let mut wkc = 0u16;

        for (i, drive) in self.drives.iter_mut().enumerate() {
            let offset = i * STRIDE;
            if outputs.len() < offset + STRIDE || inputs.len() < offset + STRIDE {
                continue;
            }

            let controlword = u16::from_le_bytes([outputs[offset], outputs[offset + 1]]);
            let target = i32::from_le_bytes(outputs[offset + 2..offset + 6].try_into().unwrap());

            drive.state = drive.next_state(controlword);
            if drive.state == SW_OPERATION_ENABLED {
                drive.actual_pulses = target;
            }

            inputs[offset..offset + 2].copy_from_slice(&drive.state.to_le_bytes());
            inputs[offset + 2..offset + 6].copy_from_slice(&drive.actual_pulses.to_le_bytes());
            wkc += 3;
        }

        Ok(wkc)
    }

    fn sdo_read(&mut self, _request: &SdoRequest) -> MotionResult<Vec<u8>> {
        Ok(vec![0; 4])
    }

    fn sdo_write(&mut self, _request: &SdoRequest) -> MotionResult<()> {
        Ok(())
    }

    fn close(&mut self) -> MotionResult<()> {
        Ok(())
    }
}
