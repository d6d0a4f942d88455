//! EtherCAT fieldbus layer for the motion controller (C1).
//!
//! - [`ethercat`] — master state machine, PDO/SDO, and the CSP-specific
//!   6-byte-per-direction process data mapping (§4.1)
//! - [`slave_config`] — slave identity, PDO mapping, SDO request types
//! - [`dc_sync`] — distributed-clocks synchronization

pub mod dc_sync;
pub mod ethercat;
pub mod slave_config;

pub use dc_sync::*;
pub use ethercat::*;
pub use slave_config::*;
