//! Startup error taxonomy.
//!
//! Every variant is fatal: startup aborts before the cyclic loop is
//! scheduled and the process exits with a non-zero code. Per-joint variants
//! carry the zero-based joint index.

use arm_common::config::ConfigError;
use arm_common::fieldbus::{FieldbusError, ObjectLabel, PdoEntryIdx, SdoIdx};
use thiserror::Error;

use crate::cycle::CycleError;

/// Fatal startup failure.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No master backend registered under this name.
    #[error("Master driver not found: {0}")]
    DriverNotFound(String),

    /// Master could not be claimed within the request deadline.
    #[error("Requesting master {index} failed after {attempts} attempts: {source}")]
    MasterUnavailable {
        /// Master index.
        index: u32,
        /// Number of request attempts made.
        attempts: u32,
        /// Last backend error.
        source: FieldbusError,
    },

    /// Domain creation failed.
    #[error("Domain creation failed: {0}")]
    DomainCreation(FieldbusError),

    /// Slave configuration for a joint could not be created.
    #[error("Failed to get slave configuration for joint {joint}: {source}")]
    SlaveConfig {
        /// Joint index.
        joint: usize,
        /// Backend error.
        source: FieldbusError,
    },

    /// PDO mapping of a joint was rejected.
    #[error("Failed to configure PDOs for joint {joint}: {source}")]
    PdoMapping {
        /// Joint index.
        joint: usize,
        /// Backend error.
        source: FieldbusError,
    },

    /// A PDO entry of a joint could not be registered in the domain.
    #[error(
        "PDO entry {} registration failed for joint {joint}: {source}",
        ObjectLabel::from(.entry)
    )]
    PdoRegistration {
        /// Joint index.
        joint: usize,
        /// Entry.
        entry: PdoEntryIdx,
        /// Backend error.
        source: FieldbusError,
    },

    /// Master activation failed.
    #[error("Failed to activate master: {0}")]
    Activation(FieldbusError),

    /// Process data of the activated domain is unavailable or too small.
    #[error("Failed to get domain process data: {0}")]
    DomainMemory(FieldbusError),

    /// An SDO transfer failed.
    #[error(
        "SDO {} transfer failed for joint {joint}: {source}",
        ObjectLabel::from(.sdo)
    )]
    SdoTransfer {
        /// Joint index.
        joint: usize,
        /// Object.
        sdo: SdoIdx,
        /// Backend error.
        source: FieldbusError,
    },

    /// Read-back of a written SDO returned a different value.
    #[error(
        "SDO {} read-back mismatch for joint {joint}: wrote {written}, read {read}",
        ObjectLabel::from(.sdo)
    )]
    SdoMismatch {
        /// Joint index.
        joint: usize,
        /// Object.
        sdo: SdoIdx,
        /// Value written.
        written: i64,
        /// Value read back.
        read: i64,
    },

    /// Real-time setup of the loop thread failed.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// Worker thread could not be spawned or panicked.
    #[error("Thread '{name}' failed: {reason}")]
    Thread {
        /// Thread name.
        name: &'static str,
        /// Failure description.
        reason: String,
    },
}

impl StartupError {
    /// Joint the error refers to, if any.
    pub fn joint(&self) -> Option<usize> {
        match self {
            Self::SlaveConfig { joint, .. }
            | Self::PdoMapping { joint, .. }
            | Self::PdoRegistration { joint, .. }
            | Self::SdoTransfer { joint, .. }
            | Self::SdoMismatch { joint, .. } => Some(*joint),
            _ => None,
        }
    }
}
