//! # Arm HAL
//!
//! EtherCAT master lifecycle, CiA402 drive commissioning and the cyclic
//! process-data exchange of a multi-joint servo arm.
//!
//! # Module Structure
//!
//! - [`master`] - Master request, domain configuration, activation, release
//! - [`domain`] - Signal list and per-joint process data offsets
//! - [`sdo`] - Startup parameter download with read-back verification
//! - [`drive`] - CiA402 state machine and the commissioning sequence
//! - [`cycle`] - Cyclic exchange loop, RT setup and timing statistics
//! - [`bridge`] - Command ingest and state publisher
//! - [`context`] - Owning context built at startup
//! - [`core`] - Thread management
//! - [`driver_registry`] / [`drivers`] - Master backends
//!
//! # Architecture
//!
//! ```text
//!  commands ──► CommandIngest ──► JointCommandTable ─┐
//!                                                    ▼
//!                 ┌───────────── CyclicExchange ─────────────┐
//!                 │ receive → snapshot → commission / write  │
//!                 │         → queue + send                   │
//!                 └───────┬───────────────────────┬──────────┘
//!                         ▼                       ▼
//!               EthercatMaster (trait)   JointStateSnapshot ──► StatePublisher ──► states
//! ```

#![deny(missing_docs)]

pub mod bridge;
pub mod context;
pub mod core;
pub mod cycle;
pub mod domain;
pub mod drive;
pub mod driver_registry;
pub mod drivers;
pub mod error;
pub mod master;
pub mod sdo;

pub use crate::context::ArmContext;
pub use crate::core::{ArmCore, RtOptions};
pub use crate::cycle::CyclicExchange;
pub use crate::driver_registry::DriverRegistry;
pub use crate::error::StartupError;
