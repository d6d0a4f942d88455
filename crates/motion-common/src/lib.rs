#![doc = "Common types shared across the motion-controller workspace."]

pub mod cia402;
pub mod command;
pub mod config;
pub mod diagnostics;
pub mod drive;
pub mod error;
pub mod metrics;
pub mod state;
pub mod units;

pub use cia402::*;
pub use command::*;
pub use config::*;
pub use diagnostics::*;
pub use drive::*;
pub use error::*;
pub use metrics::*;
pub use state::*;
pub use units::*;
