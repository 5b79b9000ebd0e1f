//! Simulated EtherCAT bus.
//!
//! A software master with one CiA402 drive model per ring position, for
//! development and testing without hardware. [`SimHandle`] gives tests a
//! view onto the bus and lets them inject faults.

mod bus;
mod drive;
mod master;

pub use bus::{SimHandle, SimOptions};
pub use drive::{ABORT_LENGTH_MISMATCH, ABORT_NO_OBJECT, SimDrive};
pub use master::SimulatedMaster;

use arm_common::fieldbus::EthercatMaster;

/// Registry name of the simulation backend.
pub const DRIVER_NAME: &str = "simulation";

/// Factory function for the driver registry.
pub fn create_master() -> Box<dyn EthercatMaster> {
    Box::new(SimulatedMaster::default())
}
