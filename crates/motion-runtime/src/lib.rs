#![doc = "Real-time execution engine for the motion controller."]

pub mod bootstrap;
pub mod control_loop;
pub mod coupling;
pub mod fault_recorder;
pub mod realtime;
pub mod safety;
pub mod trajectory;
pub mod watchdog;

#[cfg(test)]
mod test_support;

pub use bootstrap::{bootstrap, BootstrapOutcome};
pub use control_loop::{ControlLoop, CouplingConfig};
pub use fault_recorder::{FaultFrame, FaultReason, FaultRecorder, FaultSummary};
pub use realtime::*;
pub use safety::{AxisReading, SupervisorOutcome, SyncErrorGuard};
pub use watchdog::*;
