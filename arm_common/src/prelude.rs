//! Prelude module for common re-exports.
//!
//! # Usage
//!
//! ```rust
//! use arm_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ArmConfig, CodecConfig, ConfigError, ConfigLoader, JointClass, JointConfig, SharedConfig,
    SlaveIdentity,
};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{DEFAULT_CYCLE_TIME_US, MAX_JOINTS, NUM_JOINTS};

// ─── Drive profile ──────────────────────────────────────────────────
pub use crate::cia402::{ControlAction, ControlWord, DriveState, StatusWord, classify};
pub use crate::codec::PositionCodec;

// ─── Fieldbus ───────────────────────────────────────────────────────
pub use crate::fieldbus::{
    DomainIdx, EthercatMaster, FieldbusError, MasterFactory, SlaveConfigIdx,
};

// ─── Joint data ─────────────────────────────────────────────────────
pub use crate::joint::{JointCommand, JointCommandTable, JointStateMsg, JointStateSnapshot};

/// Default cycle time as Duration.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_micros(DEFAULT_CYCLE_TIME_US as u64);
