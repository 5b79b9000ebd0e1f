//! Shared simulated bus state and the test handle onto it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arm_common::cia402::DriveState;
use arm_common::consts::{NUM_JOINTS, ZEROERR_EROB_PRODUCT_CODE, ZEROERR_VENDOR_ID};
use arm_common::fieldbus::{ObjectLabel, SdoIdx, SlaveId};
use parking_lot::Mutex;

use super::drive::SimDrive;

/// Construction options of a simulated bus.
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Number of drives on the ring.
    pub joints: usize,
    /// Identity every drive reports.
    pub identity: SlaveId,
    /// Bus cycles a slave spends in SAFE-OP before reaching OP.
    pub op_delay_cycles: u32,
    /// Number of `request` calls that fail before the master is available.
    pub unavailable_requests: u32,
    /// Encoder position of each drive at power-up; missing entries are 0.
    pub initial_positions: Vec<i32>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            joints: NUM_JOINTS,
            identity: SlaveId {
                vendor_id: ZEROERR_VENDOR_ID,
                product_code: ZEROERR_EROB_PRODUCT_CODE,
            },
            op_delay_cycles: 3,
            unavailable_requests: 0,
            initial_positions: Vec::new(),
        }
    }
}

/// Bus state shared by the master and its handles.
#[derive(Debug)]
pub(crate) struct SimBus {
    pub(crate) drives: Vec<SimDrive>,
    pub(crate) identity: SlaveId,
    pub(crate) op_delay_cycles: u32,
    pub(crate) unavailable_requests: u32,
    pub(crate) request_attempts: u32,
    pub(crate) released: bool,
    pub(crate) resets: u32,
    pub(crate) resets_required: u32,
    pub(crate) sdo_aborts: HashMap<(u16, ObjectLabel), u32>,
    pub(crate) corrupt_readback: HashSet<(u16, ObjectLabel)>,
    pub(crate) failing_slave_config: Option<u16>,
    pub(crate) failing_pdo_config: Option<u16>,
    pub(crate) fail_activation: bool,
}

impl SimBus {
    pub(crate) fn new(options: &SimOptions) -> Self {
        let drives = (0..options.joints)
            .map(|j| SimDrive::new(options.initial_positions.get(j).copied().unwrap_or(0)))
            .collect();
        Self {
            drives,
            identity: options.identity,
            op_delay_cycles: options.op_delay_cycles,
            unavailable_requests: options.unavailable_requests,
            request_attempts: 0,
            released: false,
            resets: 0,
            resets_required: 0,
            sdo_aborts: HashMap::new(),
            corrupt_readback: HashSet::new(),
            failing_slave_config: None,
            failing_pdo_config: None,
            fail_activation: false,
        }
    }

    /// Whether slaves are held out of OP until more resets happen.
    pub(crate) fn op_blocked(&self) -> bool {
        self.resets < self.resets_required
    }
}

/// Inspection and fault injection handle onto a simulated bus.
///
/// Cloned freely; every clone sees the same bus as the master it was taken
/// from.
#[derive(Debug, Clone)]
pub struct SimHandle {
    pub(crate) bus: Arc<Mutex<SimBus>>,
}

impl SimHandle {
    // ─── Fault injection ────────────────────────────────────────────

    /// Hold every slave out of OP until `resets` master resets have been
    /// issued.
    pub fn set_resets_required(&self, resets: u32) {
        self.bus.lock().resets_required = resets;
    }

    /// Keep the slave at `position` out of OP forever.
    pub fn set_never_operational(&self, position: u16, never: bool) {
        if let Some(drive) = self.bus.lock().drives.get_mut(usize::from(position)) {
            drive.set_never_operational(never);
        }
    }

    /// Put the drive at `position` into `FaultReactionActive`.
    pub fn inject_drive_fault(&self, position: u16) {
        if let Some(drive) = self.bus.lock().drives.get_mut(usize::from(position)) {
            drive.inject_fault();
        }
    }

    /// Abort every transfer of `sdo` on `position` with `code`.
    pub fn fail_sdo(&self, position: u16, sdo: SdoIdx, code: u32) {
        self.bus.lock().sdo_aborts.insert((position, ObjectLabel::from(sdo)), code);
    }

    /// Return a different value than stored when `sdo` is uploaded.
    pub fn corrupt_readback(&self, position: u16, sdo: SdoIdx) {
        self.bus.lock().corrupt_readback.insert((position, ObjectLabel::from(sdo)));
    }

    /// Refuse to create the slave configuration for `position`.
    pub fn fail_slave_config(&self, position: u16) {
        self.bus.lock().failing_slave_config = Some(position);
    }

    /// Reject the PDO mapping for `position`.
    pub fn fail_pdo_config(&self, position: u16) {
        self.bus.lock().failing_pdo_config = Some(position);
    }

    /// Make `activate` fail.
    pub fn fail_activation(&self) {
        self.bus.lock().fail_activation = true;
    }

    // ─── Inspection ─────────────────────────────────────────────────

    /// Master resets issued so far.
    pub fn resets(&self) -> u32 {
        self.bus.lock().resets
    }

    /// `request` calls so far.
    pub fn request_attempts(&self) -> u32 {
        self.bus.lock().request_attempts
    }

    /// Whether the master has been released.
    pub fn released(&self) -> bool {
        self.bus.lock().released
    }

    /// CiA402 state of the drive at `position`.
    pub fn drive_state(&self, position: u16) -> Option<DriveState> {
        self.bus
            .lock()
            .drives
            .get(usize::from(position))
            .map(SimDrive::state)
    }

    /// Whether the slave at `position` is in OP.
    pub fn is_operational(&self, position: u16) -> bool {
        self.bus
            .lock()
            .drives
            .get(usize::from(position))
            .is_some_and(SimDrive::is_operational)
    }

    /// Target position last received by the drive at `position`.
    pub fn target_position(&self, position: u16) -> Option<i32> {
        self.bus
            .lock()
            .drives
            .get(usize::from(position))
            .map(SimDrive::target)
    }

    /// Encoder position of the drive at `position`.
    pub fn actual_position(&self, position: u16) -> Option<i32> {
        self.bus
            .lock()
            .drives
            .get(usize::from(position))
            .map(SimDrive::actual)
    }

    /// Raw object dictionary content of `sdo` on `position`.
    pub fn sdo_value(&self, position: u16, sdo: SdoIdx) -> Option<Vec<u8>> {
        self.bus
            .lock()
            .drives
            .get(usize::from(position))
            .and_then(|d| d.upload(sdo).ok())
    }
}
