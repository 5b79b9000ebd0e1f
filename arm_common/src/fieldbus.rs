//! EtherCAT master contract and error types.
//!
//! This module defines:
//! - `EthercatMaster` trait - Interface every master backend implements
//! - `FieldbusError` enum - Error types for master operations
//! - `MasterFactory` type alias - Factory function type for the driver registry
//! - Addressing and PDO layout types, re-exported from `ethercat-types`
//! - State records shared by all backends
//!
//! The trait mirrors the IgH master API closely: one master owns its domains
//! and slave configurations, addressed by index. The cyclic calls
//! (`receive`, `process_domain`, `queue_domain`, `send`, the state queries and
//! `domain_data`) must not block. SDO transfers and `request` may block and are
//! only used before the cyclic loop starts.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use ethercat_types::{
    AlState, Idx, PdoCfg, PdoEntryIdx, PdoEntryInfo, PdoEntryPos, PdoIdx, SdoIdx, SlaveAddr,
    SlaveId, SlavePos, SmCfg, SmIdx, SubIdx, SyncDirection, WatchdogMode,
};

/// Domain handle returned by [`EthercatMaster::create_domain`].
pub type DomainIdx = usize;

/// Slave configuration handle returned by [`EthercatMaster::configure_slave`].
pub type SlaveConfigIdx = usize;

/// Error types for fieldbus operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldbusError {
    /// The requested master does not exist or is held by another process.
    #[error("EtherCAT master {0} unavailable")]
    MasterUnavailable(u32),

    /// Operation needs a requested master.
    #[error("Master not requested")]
    NotRequested,

    /// Operation is only valid before activation.
    #[error("Master already active")]
    AlreadyActive,

    /// Operation is only valid after activation.
    #[error("Master not active")]
    NotActive,

    /// Unknown domain handle.
    #[error("Unknown domain {0}")]
    UnknownDomain(DomainIdx),

    /// Unknown slave configuration handle.
    #[error("Unknown slave configuration {0}")]
    UnknownSlaveConfig(SlaveConfigIdx),

    /// Slave configuration could not be created.
    #[error("Failed to configure slave at {addr:?}: {reason}")]
    SlaveConfig {
        /// Requested address.
        addr: SlaveAddr,
        /// Backend explanation.
        reason: String,
    },

    /// PDO entry is not part of the configured mapping.
    #[error(
        "PDO entry {} not mapped for slave configuration {config}",
        ObjectLabel::from(.entry)
    )]
    PdoEntryNotMapped {
        /// Slave configuration handle.
        config: SlaveConfigIdx,
        /// Entry that was requested.
        entry: PdoEntryIdx,
    },

    /// Slave answered with an SDO abort.
    #[error(
        "SDO {} on slave {position} aborted with code {code:#010x}",
        ObjectLabel::from(.sdo)
    )]
    SdoAbort {
        /// Slave ring position.
        position: u16,
        /// Object.
        sdo: SdoIdx,
        /// CoE abort code.
        code: u32,
    },

    /// SDO transfer timed out.
    #[error("SDO {} on slave {position} timed out", ObjectLabel::from(.sdo))]
    SdoTimeout {
        /// Slave ring position.
        position: u16,
        /// Object.
        sdo: SdoIdx,
    },

    /// Upload buffer does not match the object size.
    #[error(
        "SDO {} size mismatch: expected {expected} bytes, got {actual}",
        ObjectLabel::from(.sdo)
    )]
    SdoSize {
        /// Object.
        sdo: SdoIdx,
        /// Buffer size.
        expected: usize,
        /// Object size.
        actual: usize,
    },

    /// Lower-level I/O failure.
    #[error("Fieldbus I/O error: {0}")]
    Io(String),
}

/// Factory function type for creating master backends.
pub type MasterFactory = fn() -> Box<dyn EthercatMaster>;

// ─── Addressing ─────────────────────────────────────────────────────

/// CoE object address with index and sub-index.
pub fn coe_object(index: u16, sub_index: u8) -> SdoIdx {
    SdoIdx {
        idx: Idx::from(index),
        sub_idx: SubIdx::from(sub_index),
    }
}

/// PDO entry address with index and sub-index.
pub fn pdo_entry(index: u16, sub_index: u8) -> PdoEntryIdx {
    PdoEntryIdx {
        idx: Idx::from(index),
        sub_idx: SubIdx::from(sub_index),
    }
}

/// Renders a CoE or PDO entry address as `0x6081:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectLabel {
    index: u16,
    sub_index: u8,
}

impl ObjectLabel {
    /// Object index.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Sub-index.
    pub fn sub_index(&self) -> u8 {
        self.sub_index
    }
}

impl From<&SdoIdx> for ObjectLabel {
    fn from(sdo: &SdoIdx) -> Self {
        Self {
            index: u16::from(sdo.idx),
            sub_index: u8::from(sdo.sub_idx),
        }
    }
}

impl From<SdoIdx> for ObjectLabel {
    fn from(sdo: SdoIdx) -> Self {
        Self::from(&sdo)
    }
}

impl From<&PdoEntryIdx> for ObjectLabel {
    fn from(entry: &PdoEntryIdx) -> Self {
        Self {
            index: u16::from(entry.idx),
            sub_index: u8::from(entry.sub_idx),
        }
    }
}

impl From<PdoEntryIdx> for ObjectLabel {
    fn from(entry: PdoEntryIdx) -> Self {
        Self::from(&entry)
    }
}

impl fmt::Display for ObjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}:{:02x}", self.index, self.sub_index)
    }
}

// ─── PDO layout ─────────────────────────────────────────────────────

/// Sync manager configuration with its assigned PDOs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sync manager index, direction and watchdog mode.
    pub sm: SmCfg,
    /// Assigned PDOs.
    pub pdos: Vec<PdoCfg>,
}

// ─── State reporting ────────────────────────────────────────────────

/// Master-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MasterState {
    /// Number of slaves answering on the ring.
    pub slaves_responding: u32,
    /// OR of the AL states of all slaves.
    pub al_states: u8,
    /// Whether the Ethernet link is up.
    pub link_up: bool,
}

/// Working counter interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WcState {
    /// No registered process data was exchanged.
    #[default]
    Zero,
    /// Some registered process data was exchanged.
    Incomplete,
    /// All registered process data was exchanged.
    Complete,
}

/// Domain state after the last `process_domain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainState {
    /// Working counter value.
    pub working_counter: u32,
    /// Working counter interpretation.
    pub wc_state: WcState,
}

/// State of one slave configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveConfigState {
    /// Slave answers on the bus.
    pub online: bool,
    /// Slave is in OP and exchanging process data.
    pub operational: bool,
    /// Current AL state.
    pub al_state: AlState,
}

// ─── Master trait ───────────────────────────────────────────────────

/// Interface every EtherCAT master backend implements.
///
/// # Lifecycle
///
/// 1. `request()` - claim the master
/// 2. `create_domain()`, `configure_slave()`, `configure_pdos()`,
///    `register_pdo_entry()` - build the process image
/// 3. `activate()` - commit configuration, process image becomes live
/// 4. cyclic: `receive()`, `process_domain()`, `domain_data()`,
///    `queue_domain()`, `send()`
/// 5. `release()`
///
/// SDO transfers are allowed between `configure_slave()` and the start of the
/// cyclic phase.
pub trait EthercatMaster: Send {
    /// Backend identifier (e.g. "simulation").
    fn name(&self) -> &'static str;

    /// Claim master `index`.
    ///
    /// # Errors
    /// `FieldbusError::MasterUnavailable` if the master cannot be claimed
    /// right now; callers may retry.
    fn request(&mut self, index: u32) -> Result<(), FieldbusError>;

    /// Create a process-data domain.
    fn create_domain(&mut self) -> Result<DomainIdx, FieldbusError>;

    /// Create a configuration for the slave at `addr`, expecting `expected`.
    fn configure_slave(
        &mut self,
        addr: SlaveAddr,
        expected: SlaveId,
    ) -> Result<SlaveConfigIdx, FieldbusError>;

    /// Apply sync manager and PDO mapping to a slave configuration.
    fn configure_pdos(
        &mut self,
        config: SlaveConfigIdx,
        syncs: &[SyncConfig],
    ) -> Result<(), FieldbusError>;

    /// Register a mapped PDO entry in `domain`; returns its byte offset in
    /// the domain's process data.
    fn register_pdo_entry(
        &mut self,
        config: SlaveConfigIdx,
        entry: PdoEntryIdx,
        domain: DomainIdx,
    ) -> Result<usize, FieldbusError>;

    /// Commit configuration and start the bus.
    fn activate(&mut self) -> Result<(), FieldbusError>;

    /// Size of the domain's process data in bytes.
    fn domain_size(&self, domain: DomainIdx) -> Result<usize, FieldbusError>;

    /// Live process data of an activated domain.
    fn domain_data(&mut self, domain: DomainIdx) -> Result<&mut [u8], FieldbusError>;

    /// Fetch received frames.
    fn receive(&mut self) -> Result<(), FieldbusError>;

    /// Evaluate received datagrams into the domain's process data.
    fn process_domain(&mut self, domain: DomainIdx) -> Result<(), FieldbusError>;

    /// Queue the domain's datagrams for the next `send`.
    fn queue_domain(&mut self, domain: DomainIdx) -> Result<(), FieldbusError>;

    /// Transmit queued datagrams.
    fn send(&mut self) -> Result<(), FieldbusError>;

    /// Retry configuration of slaves that are not operational.
    fn reset(&mut self) -> Result<(), FieldbusError>;

    /// Master-wide state.
    fn state(&self) -> Result<MasterState, FieldbusError>;

    /// State of a domain after the last `process_domain`.
    fn domain_state(&self, domain: DomainIdx) -> Result<DomainState, FieldbusError>;

    /// State of one slave configuration.
    fn slave_config_state(
        &mut self,
        config: SlaveConfigIdx,
    ) -> Result<SlaveConfigState, FieldbusError>;

    /// Blocking SDO write.
    fn sdo_download(
        &mut self,
        position: SlavePos,
        sdo: SdoIdx,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), FieldbusError>;

    /// Blocking SDO read into `target`; returns the number of bytes read.
    fn sdo_upload(
        &mut self,
        position: SlavePos,
        sdo: SdoIdx,
        target: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, FieldbusError>;

    /// Release the master. Idempotent.
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fieldbus_error_display() {
        let err = FieldbusError::SdoAbort {
            position: 3,
            sdo: coe_object(0x6081, 0),
            code: 0x0609_0030,
        };
        let text = err.to_string();
        assert!(text.contains("0x6081:00"));
        assert!(text.contains("slave 3"));
        assert!(text.contains("0x06090030"));
    }

    #[test]
    fn test_object_label() {
        let label = ObjectLabel::from(pdo_entry(0x607A, 0));
        assert_eq!(label.index(), 0x607A);
        assert_eq!(label.sub_index(), 0);
        assert_eq!(label.to_string(), "0x607a:00");
        assert_eq!(ObjectLabel::from(coe_object(0x2000, 0x11)).to_string(), "0x2000:11");
    }

    #[test]
    fn test_unmapped_entry_display() {
        let err = FieldbusError::PdoEntryNotMapped {
            config: 2,
            entry: pdo_entry(0x6041, 0),
        };
        assert_eq!(
            err.to_string(),
            "PDO entry 0x6041:00 not mapped for slave configuration 2"
        );
    }

    #[test]
    fn test_state_defaults() {
        assert_eq!(MasterState::default().slaves_responding, 0);
        assert_eq!(DomainState::default().wc_state, WcState::Zero);
    }
}
