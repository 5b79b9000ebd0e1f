//! EtherCAT master backends.
//!
//! - [`simulation`] - Software bus with CiA402 drive models, for development
//!   and testing without hardware
//! - `igh` - IgH EtherLab kernel master, built with the `igh` feature
//!
//! # Adding a backend
//!
//! 1. Create a submodule under `drivers/`
//! 2. Implement `EthercatMaster` from `arm_common::fieldbus`
//! 3. Register its factory in [`register_all`]

#[cfg(feature = "igh")]
pub mod igh;
pub mod simulation;

use crate::driver_registry::DriverRegistry;

/// Register every built-in backend.
pub fn register_all(registry: &mut DriverRegistry) {
    registry.register(simulation::DRIVER_NAME, simulation::create_master);
    #[cfg(feature = "igh")]
    registry.register(igh::DRIVER_NAME, igh::create_master);
}
