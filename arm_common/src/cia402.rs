//! CiA402 drive profile: status word, control word, drive states.
//!
//! The power drive state of a joint is never stored by the drive as a single
//! value; it is inferred from a handful of status-word bits. Classification is
//! a fixed table of `(mask, pattern)` pairs evaluated in priority order. The
//! two fault states have their own patterns rather than being derived as
//! "none of the others matched".
//!
//! | mask   | pattern | state                 | control-word action        |
//! |--------|---------|-----------------------|----------------------------|
//! | 0x004F | 0x0000  | `NotReady`            | none                       |
//! | 0x004F | 0x0040  | `SwitchOnDisabled`    | shutdown                   |
//! | 0x006F | 0x0021  | `ReadyToSwitchOn`     | switch on                  |
//! | 0x006F | 0x0023  | `SwitchedOn`          | enable operation           |
//! | 0x006F | 0x0027  | `OperationEnabled`    | none                       |
//! | 0x006F | 0x0007  | `QuickStopActive`     | enable operation           |
//! | 0x004F | 0x000F  | `FaultReactionActive` | fault-reset request 0x0080 |
//! | 0x004F | 0x0008  | `Fault`               | set fault-reset bit        |

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Statusword (0x6041) bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusWord: u16 {
        /// Ready to switch on.
        const READY_TO_SWITCH_ON = 0x0001;
        /// Switched on.
        const SWITCHED_ON        = 0x0002;
        /// Operation enabled.
        const OPERATION_ENABLED  = 0x0004;
        /// Fault.
        const FAULT              = 0x0008;
        /// Voltage enabled.
        const VOLTAGE_ENABLED    = 0x0010;
        /// Quick stop (active low).
        const QUICK_STOP         = 0x0020;
        /// Switch on disabled.
        const SWITCH_ON_DISABLED = 0x0040;
        /// Warning.
        const WARNING            = 0x0080;
        /// Remote (controlword is processed).
        const REMOTE             = 0x0200;
        /// Target reached.
        const TARGET_REACHED     = 0x0400;
    }
}

bitflags! {
    /// Controlword (0x6040) bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControlWord: u16 {
        /// Switch on.
        const SWITCH_ON        = 0x0001;
        /// Enable voltage.
        const ENABLE_VOLTAGE   = 0x0002;
        /// Quick stop (active low).
        const QUICK_STOP       = 0x0004;
        /// Enable operation.
        const ENABLE_OPERATION = 0x0008;
        /// Fault reset (rising edge).
        const FAULT_RESET      = 0x0080;
        /// Halt.
        const HALT             = 0x0100;
    }
}

/// Status mask ignoring the quick-stop bit.
pub const MASK_WITHOUT_QUICK_STOP: u16 = 0x004F;

/// Status mask including the quick-stop bit.
pub const MASK_WITH_QUICK_STOP: u16 = 0x006F;

/// Controlword written while a drive is in `FaultReactionActive`.
pub const FAULT_RESET_REQUEST: u16 = 0x0080;

/// CiA402 power drive system state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DriveState {
    /// Not ready to switch on (drive booting).
    #[default]
    NotReady = 0,
    /// Switch on disabled.
    SwitchOnDisabled = 1,
    /// Ready to switch on.
    ReadyToSwitchOn = 2,
    /// Switched on.
    SwitchedOn = 3,
    /// Operation enabled; the drive follows the target position.
    OperationEnabled = 4,
    /// Quick stop active.
    QuickStopActive = 5,
    /// Fault reaction active.
    FaultReactionActive = 6,
    /// Fault.
    Fault = 7,
}

impl DriveState {
    /// Whether the state is one of the two fault states.
    #[inline]
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::Fault | Self::FaultReactionActive)
    }
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotReady => "Not ready",
            Self::SwitchOnDisabled => "Switch on disabled",
            Self::ReadyToSwitchOn => "Ready to switch on",
            Self::SwitchedOn => "Switched on",
            Self::OperationEnabled => "Operation enabled",
            Self::QuickStopActive => "Quick stop active",
            Self::FaultReactionActive => "Fault reaction active",
            Self::Fault => "Fault",
        };
        f.write_str(name)
    }
}

/// Control-word write associated with a classified state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Leave the control word untouched.
    None,
    /// Shutdown command: `(cw & 0x7E) | 0x06`.
    Shutdown,
    /// Switch on command: `(cw & 0x77) | 0x07`.
    SwitchOn,
    /// Enable operation command: `(cw & 0x7F) | 0x0F`.
    EnableOperation,
    /// Overwrite with the fault-reset request `0x0080`.
    FaultResetRequest,
    /// Set the fault-reset bit, keep all other bits.
    FaultReset,
}

impl ControlAction {
    /// New control word for the given current one, or `None` if nothing is written.
    #[inline]
    pub const fn apply(self, control_word: u16) -> Option<u16> {
        match self {
            Self::None => None,
            Self::Shutdown => Some((control_word & 0b0111_1110) | 0b0000_0110),
            Self::SwitchOn => Some((control_word & 0b0111_0111) | 0b0000_0111),
            Self::EnableOperation => Some((control_word & 0b0111_1111) | 0b0000_1111),
            Self::FaultResetRequest => Some(FAULT_RESET_REQUEST),
            Self::FaultReset => Some((control_word & 0b1111_1111) | 0b1000_0000),
        }
    }
}

/// One row of the status-word classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatePattern {
    /// Bits of the status word that take part in the comparison.
    pub mask: u16,
    /// Expected value of the masked bits.
    pub pattern: u16,
    /// State assigned on match.
    pub state: DriveState,
    /// Control word action on match.
    pub action: ControlAction,
}

impl StatePattern {
    /// Whether `status_word` matches this row.
    #[inline]
    pub const fn matches(&self, status_word: u16) -> bool {
        status_word & self.mask == self.pattern
    }
}

/// Classification table in evaluation priority order.
pub const STATE_TABLE: [StatePattern; 8] = [
    StatePattern {
        mask: MASK_WITHOUT_QUICK_STOP,
        pattern: 0x0000,
        state: DriveState::NotReady,
        action: ControlAction::None,
    },
    StatePattern {
        mask: MASK_WITHOUT_QUICK_STOP,
        pattern: 0x0040,
        state: DriveState::SwitchOnDisabled,
        action: ControlAction::Shutdown,
    },
    StatePattern {
        mask: MASK_WITH_QUICK_STOP,
        pattern: 0x0021,
        state: DriveState::ReadyToSwitchOn,
        action: ControlAction::SwitchOn,
    },
    StatePattern {
        mask: MASK_WITH_QUICK_STOP,
        pattern: 0x0023,
        state: DriveState::SwitchedOn,
        action: ControlAction::EnableOperation,
    },
    StatePattern {
        mask: MASK_WITH_QUICK_STOP,
        pattern: 0x0027,
        state: DriveState::OperationEnabled,
        action: ControlAction::None,
    },
    StatePattern {
        mask: MASK_WITH_QUICK_STOP,
        pattern: 0x0007,
        state: DriveState::QuickStopActive,
        action: ControlAction::EnableOperation,
    },
    StatePattern {
        mask: MASK_WITHOUT_QUICK_STOP,
        pattern: 0x000F,
        state: DriveState::FaultReactionActive,
        action: ControlAction::FaultResetRequest,
    },
    StatePattern {
        mask: MASK_WITHOUT_QUICK_STOP,
        pattern: 0x0008,
        state: DriveState::Fault,
        action: ControlAction::FaultReset,
    },
];

/// Find the first table row matching `status_word`.
#[inline]
pub fn classify(status_word: u16) -> Option<&'static StatePattern> {
    STATE_TABLE.iter().find(|row| row.matches(status_word))
}

/// Canonical status word reported by a drive in `state`.
///
/// Voltage-enabled and remote bits are set the way a powered drive reports
/// them; every returned value classifies back to `state`.
pub const fn status_word_for(state: DriveState) -> u16 {
    match state {
        DriveState::NotReady => 0x0000,
        DriveState::SwitchOnDisabled => 0x0250,
        DriveState::ReadyToSwitchOn => 0x0231,
        DriveState::SwitchedOn => 0x0233,
        DriveState::OperationEnabled => 0x0237,
        DriveState::QuickStopActive => 0x0217,
        DriveState::FaultReactionActive => 0x021F,
        DriveState::Fault => 0x0218,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [DriveState; 8] = [
        DriveState::NotReady,
        DriveState::SwitchOnDisabled,
        DriveState::ReadyToSwitchOn,
        DriveState::SwitchedOn,
        DriveState::OperationEnabled,
        DriveState::QuickStopActive,
        DriveState::FaultReactionActive,
        DriveState::Fault,
    ];

    #[test]
    fn every_bare_pattern_classifies_to_its_row() {
        for row in STATE_TABLE.iter() {
            let found = classify(row.pattern).expect("pattern must classify");
            assert_eq!(found.state, row.state, "pattern {:#06x}", row.pattern);
        }
    }

    #[test]
    fn canonical_status_words_round_trip() {
        for state in ALL_STATES {
            let sw = status_word_for(state);
            assert_eq!(classify(sw).map(|r| r.state), Some(state), "{state}");
        }
    }

    #[test]
    fn ignored_bits_do_not_change_classification() {
        // Warning, remote, target reached and voltage enabled are outside both masks.
        let noise = StatusWord::WARNING | StatusWord::REMOTE | StatusWord::TARGET_REACHED;
        assert_eq!(
            classify(0x0027 | noise.bits()).map(|r| r.state),
            Some(DriveState::OperationEnabled)
        );
        assert_eq!(
            classify(0x0008 | noise.bits()).map(|r| r.state),
            Some(DriveState::Fault)
        );
    }

    #[test]
    fn unmatched_patterns_return_none() {
        // Ready-to-switch-on bits with quick stop cleared is not a valid state.
        assert!(classify(0x0001).is_none());
        // Switched-on without ready bit.
        assert!(classify(0x0022).is_none());
    }

    #[test]
    fn fault_patterns_are_independent() {
        // Fault bit plus ready/switched-on/enabled → fault reaction, not operation enabled.
        assert_eq!(
            classify(0x002F).map(|r| r.state),
            Some(DriveState::FaultReactionActive)
        );
        assert_eq!(classify(0x0028).map(|r| r.state), Some(DriveState::Fault));
    }

    #[test]
    fn control_actions_follow_the_table() {
        assert_eq!(ControlAction::None.apply(0x1234), None);
        assert_eq!(ControlAction::Shutdown.apply(0x0000), Some(0x0006));
        assert_eq!(ControlAction::Shutdown.apply(0x0080), Some(0x0006));
        assert_eq!(ControlAction::SwitchOn.apply(0x0006), Some(0x0007));
        assert_eq!(ControlAction::SwitchOn.apply(0x000E), Some(0x0007));
        assert_eq!(ControlAction::EnableOperation.apply(0x0007), Some(0x000F));
        assert_eq!(ControlAction::FaultResetRequest.apply(0x000F), Some(0x0080));
        assert_eq!(ControlAction::FaultReset.apply(0x000F), Some(0x008F));
    }

    #[test]
    fn fault_state_helper() {
        assert!(DriveState::Fault.is_fault());
        assert!(DriveState::FaultReactionActive.is_fault());
        assert!(!DriveState::QuickStopActive.is_fault());
        assert_eq!(DriveState::default(), DriveState::NotReady);
    }
}
