//! Arm Common Library
//!
//! Shared definitions for the arm EtherCAT interface: everything that does
//! not need a live fieldbus to be meaningful.
//!
//! # Module Structure
//!
//! - [`consts`] - Joint counts, default periods and CoE object indices
//! - [`config`] - TOML configuration loading and validation
//! - [`codec`] - Encoder counts ↔ radians conversion
//! - [`cia402`] - CiA402 status/control words and drive-state classification
//! - [`fieldbus`] - Contract every EtherCAT master backend implements
//! - [`joint`] - Command table, state snapshot and channel messages
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use arm_common::prelude::*;
//!
//! let codec = PositionCodec::default();
//! assert_eq!(codec.counts_to_radians(0), 0.0);
//! ```

pub mod cia402;
pub mod codec;
pub mod config;
pub mod consts;
pub mod fieldbus;
pub mod joint;
pub mod prelude;
