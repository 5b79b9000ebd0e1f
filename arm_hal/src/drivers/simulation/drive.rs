//! CiA402 servo drive model.
//!
//! Follows the drive-side transitions of the device control state machine
//! in CSP mode: in `OperationEnabled` the actual position tracks the target
//! every cycle. The object dictionary holds the objects written during
//! startup, stored little-endian.

use std::collections::HashMap;

use arm_common::cia402::{DriveState, FAULT_RESET_REQUEST, status_word_for};
use arm_common::consts::objects;
use arm_common::fieldbus::{AlState, ObjectLabel, SdoIdx, coe_object};

/// CoE abort: object does not exist in the object dictionary.
pub const ABORT_NO_OBJECT: u32 = 0x0602_0000;

/// CoE abort: data type does not match, length of service parameter does
/// not match.
pub const ABORT_LENGTH_MISMATCH: u32 = 0x0607_0010;

/// One simulated joint drive.
#[derive(Debug, Clone)]
pub struct SimDrive {
    state: DriveState,
    control_word: u16,
    actual: i32,
    target: i32,
    al_state: AlState,
    op_countdown: u32,
    never_operational: bool,
    dictionary: HashMap<ObjectLabel, Vec<u8>>,
}

impl SimDrive {
    /// Drive in `NotReady` at encoder position `actual`.
    pub fn new(actual: i32) -> Self {
        let mut dictionary = HashMap::new();
        let mut object = |index: u16, bytes: &[u8]| {
            dictionary.insert(ObjectLabel::from(coe_object(index, 0)), bytes.to_vec());
        };
        object(objects::CONTROL_WORD, &0u16.to_le_bytes());
        object(objects::STATUS_WORD, &0u16.to_le_bytes());
        object(objects::MODE_OF_OPERATION, &[0]);
        object(objects::POSITION_ACTUAL, &actual.to_le_bytes());
        object(objects::FOLLOWING_ERROR_WINDOW, &0u32.to_le_bytes());
        object(objects::TARGET_POSITION, &0i32.to_le_bytes());
        object(objects::MAX_PROFILE_VELOCITY, &0u32.to_le_bytes());
        object(objects::MAX_VELOCITY, &0u32.to_le_bytes());
        object(objects::PROFILE_VELOCITY, &0u32.to_le_bytes());
        object(objects::PROFILE_ACCELERATION, &0u32.to_le_bytes());
        object(objects::PROFILE_DECELERATION, &0u32.to_le_bytes());
        object(objects::TARGET_VELOCITY, &0i32.to_le_bytes());

        Self {
            state: DriveState::NotReady,
            control_word: 0,
            actual,
            target: 0,
            al_state: AlState::Init,
            op_countdown: 0,
            never_operational: false,
            dictionary,
        }
    }

    /// CiA402 state.
    pub fn state(&self) -> DriveState {
        self.state
    }

    /// Status word matching the current state.
    pub fn status_word(&self) -> u16 {
        status_word_for(self.state)
    }

    /// Position actual value [counts].
    pub fn actual(&self) -> i32 {
        self.actual
    }

    /// Last received target position [counts].
    pub fn target(&self) -> i32 {
        self.target
    }

    /// Last received control word.
    pub fn control_word(&self) -> u16 {
        self.control_word
    }

    /// EtherCAT AL state.
    pub fn al_state(&self) -> AlState {
        self.al_state
    }

    /// Whether the slave exchanges process data.
    pub fn is_operational(&self) -> bool {
        self.al_state == AlState::Op
    }

    /// Keep the slave out of OP regardless of resets.
    pub fn set_never_operational(&mut self, never: bool) {
        self.never_operational = never;
    }

    /// Force the drive into `FaultReactionActive`.
    pub fn inject_fault(&mut self) {
        self.state = DriveState::FaultReactionActive;
    }

    // ─── AL state ───────────────────────────────────────────────────

    /// Enter PRE-OP and start the countdown to OP.
    pub(crate) fn start_bringup(&mut self, delay_cycles: u32) {
        if self.al_state != AlState::Op {
            self.al_state = AlState::PreOp;
            self.op_countdown = delay_cycles;
        }
    }

    /// One bus cycle of AL state progression. `blocked` holds the slave in
    /// SAFE-OP.
    pub(crate) fn advance_al(&mut self, blocked: bool) {
        match self.al_state {
            AlState::Op | AlState::Init | AlState::Boot => {}
            AlState::PreOp => self.al_state = AlState::SafeOp,
            AlState::SafeOp => {
                if blocked || self.never_operational {
                    return;
                }
                if self.op_countdown == 0 {
                    self.al_state = AlState::Op;
                } else {
                    self.op_countdown -= 1;
                }
            }
        }
    }

    // ─── Process data ───────────────────────────────────────────────

    /// Latch outputs received from the master.
    pub(crate) fn set_outputs(&mut self, control_word: u16, target: i32) {
        self.control_word = control_word;
        self.target = target;
    }

    /// One drive cycle: evaluate the control word, then follow the target
    /// when enabled.
    pub(crate) fn step(&mut self) {
        let cw = self.control_word;
        self.state = match self.state {
            DriveState::NotReady => DriveState::SwitchOnDisabled,
            DriveState::SwitchOnDisabled if cw & 0x0087 == 0x0006 => DriveState::ReadyToSwitchOn,
            DriveState::ReadyToSwitchOn if cw & 0x008F == 0x0007 => DriveState::SwitchedOn,
            DriveState::SwitchedOn | DriveState::QuickStopActive if cw & 0x008F == 0x000F => {
                DriveState::OperationEnabled
            }
            DriveState::FaultReactionActive => DriveState::Fault,
            DriveState::Fault if cw & FAULT_RESET_REQUEST != 0 => DriveState::SwitchOnDisabled,
            state => state,
        };

        if self.state == DriveState::OperationEnabled {
            self.actual = self.target;
        }
    }

    // ─── Object dictionary ──────────────────────────────────────────

    /// Write an object. Returns a CoE abort code on failure.
    pub(crate) fn download(&mut self, sdo: SdoIdx, data: &[u8]) -> Result<(), u32> {
        let object = ObjectLabel::from(sdo);
        let slot = self.dictionary.get_mut(&object).ok_or(ABORT_NO_OBJECT)?;
        if slot.len() != data.len() {
            return Err(ABORT_LENGTH_MISMATCH);
        }
        slot.copy_from_slice(data);

        if object.index() == objects::TARGET_POSITION {
            if let Ok(bytes) = <[u8; 4]>::try_from(data) {
                self.target = i32::from_le_bytes(bytes);
            }
        }
        Ok(())
    }

    /// Read an object. Returns a CoE abort code on failure.
    pub(crate) fn upload(&self, sdo: SdoIdx) -> Result<Vec<u8>, u32> {
        let object = ObjectLabel::from(sdo);
        match object.index() {
            objects::POSITION_ACTUAL => Ok(self.actual.to_le_bytes().to_vec()),
            objects::STATUS_WORD => Ok(self.status_word().to_le_bytes().to_vec()),
            _ => self.dictionary.get(&object).cloned().ok_or(ABORT_NO_OBJECT),
        }
    }
}
