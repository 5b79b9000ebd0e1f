//! Per-joint CiA402 state machine and the commissioning sequence.
//!
//! Commissioning runs in two phases:
//!
//! 1. **Awaiting OP**: the EtherCAT operational flag of each joint's slave is
//!    polled, one joint per cycle, in bus order. The index only moves on when
//!    the polled joint is operational.
//! 2. **Enabling drives**: the CiA402 state machine runs for the joint at the
//!    current index only. The index moves on when that joint reports
//!    `OperationEnabled`. At index N commissioning is complete.
//!
//! Once complete, every joint's state machine runs every cycle so faults are
//! answered with fault-reset requests, without re-entering commissioning.

use std::time::{Duration, Instant};

use arm_common::cia402::{self, DriveState};
use tracing::{info, warn};

use crate::domain::JointChannel;

// ─── Drive state machine ────────────────────────────────────────────

/// Result of evaluating one joint's status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveUpdate {
    /// State after evaluation.
    pub state: DriveState,
    /// Whether the state differs from the previous evaluation.
    pub changed: bool,
    /// Control word written this cycle, if any.
    pub control_word: Option<u16>,
    /// Set when the target position was overwritten with the actual
    /// position on the way to `OperationEnabled`.
    pub aligned_target: Option<i32>,
}

/// CiA402 state of one joint.
#[derive(Debug, Clone)]
pub struct DriveStateMachine {
    name: String,
    state: DriveState,
}

impl DriveStateMachine {
    /// Machine for the joint called `name`, starting in `NotReady`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: DriveState::NotReady,
        }
    }

    /// Last computed state.
    #[inline]
    pub fn state(&self) -> DriveState {
        self.state
    }

    /// Joint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Classify the joint's status word and write the resulting control word
    /// into the process image.
    ///
    /// Unmatched status patterns leave state and control word untouched. In
    /// `SwitchedOn`, a target position differing from the actual position
    /// is overwritten with the actual position.
    pub fn update(&mut self, data: &mut [u8], channel: &JointChannel) -> DriveUpdate {
        let status_word = channel.status_word(data);
        let Some(row) = cia402::classify(status_word) else {
            return DriveUpdate {
                state: self.state,
                changed: false,
                control_word: None,
                aligned_target: None,
            };
        };

        let control_word = row.action.apply(channel.control_word(data));
        if let Some(cw) = control_word {
            channel.set_control_word(data, cw);
        }

        let mut aligned_target = None;
        if row.state == DriveState::SwitchedOn {
            let actual = channel.actual_position(data);
            if channel.target_position(data) != actual {
                channel.set_target_position(data, actual);
                aligned_target = Some(actual);
            }
        }

        let changed = row.state != self.state;
        if changed {
            self.state = row.state;
            self.log_transition(status_word);
            if let Some(actual) = aligned_target {
                warn!("{}: target position differs from actual, set to {}", self.name, actual);
            }
        }

        DriveUpdate {
            state: row.state,
            changed,
            control_word,
            aligned_target,
        }
    }

    fn log_transition(&self, status_word: u16) {
        match self.state {
            DriveState::Fault | DriveState::FaultReactionActive => {
                warn!("{} State: {} (0x{:04x})", self.name, self.state, status_word)
            }
            DriveState::OperationEnabled => info!("{} State: {}!", self.name, self.state),
            _ => info!("{} State: {}", self.name, self.state),
        }
    }
}

// ─── Commissioning ──────────────────────────────────────────────────

/// Commissioning phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissioningPhase {
    /// Waiting for every slave to reach EtherCAT OP.
    AwaitingOperational,
    /// Walking joints through the CiA402 sequence one at a time.
    EnablingDrives,
    /// All joints are `OperationEnabled`; commands are written every cycle.
    Complete,
}

/// Commissioning progress of the whole arm.
#[derive(Debug, Clone)]
pub struct Commissioning {
    phase: CommissioningPhase,
    joints: usize,
    op_index: usize,
    drive_index: usize,
    op_flags: Vec<bool>,
    timeout: Duration,
    window_start: Instant,
    resets: u64,
}

impl Commissioning {
    /// Start commissioning `joints` joints; the OP window opens at `now`.
    pub fn new(joints: usize, timeout: Duration, now: Instant) -> Self {
        Self {
            phase: if joints == 0 {
                CommissioningPhase::Complete
            } else {
                CommissioningPhase::AwaitingOperational
            },
            joints,
            op_index: 0,
            drive_index: 0,
            op_flags: vec![false; joints],
            timeout,
            window_start: now,
            resets: 0,
        }
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> CommissioningPhase {
        self.phase
    }

    /// Whether all joints are enabled.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.phase == CommissioningPhase::Complete
    }

    /// Joint whose OP flag is polled next.
    #[inline]
    pub fn op_index(&self) -> usize {
        self.op_index
    }

    /// Joint currently walked through the CiA402 sequence.
    #[inline]
    pub fn drive_index(&self) -> usize {
        self.drive_index
    }

    /// Number of master resets issued so far.
    #[inline]
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Record the OP flag of the joint at `op_index()`.
    ///
    /// Logs when the flag changes. Returns `true` if this observation
    /// completed the OP phase.
    pub fn observe_operational(&mut self, name: &str, operational: bool) -> bool {
        if self.phase != CommissioningPhase::AwaitingOperational {
            return false;
        }
        let joint = self.op_index;
        if let Some(flag) = self.op_flags.get_mut(joint) {
            if *flag != operational {
                info!("{}: {}", name, if operational { "operational" } else { "not operational" });
            }
            *flag = operational;
        }

        if operational {
            self.op_index += 1;
        }
        if self.op_index >= self.joints {
            info!("All {} joints reached OP", self.joints);
            self.phase = CommissioningPhase::EnablingDrives;
            return true;
        }
        false
    }

    /// Whether the OP window has expired without every joint reaching OP.
    pub fn timed_out(&self, now: Instant) -> bool {
        self.phase == CommissioningPhase::AwaitingOperational
            && now.saturating_duration_since(self.window_start) >= self.timeout
    }

    /// Count a master reset and open a new OP window at `now`.
    pub fn restart_window(&mut self, now: Instant) {
        self.resets += 1;
        self.window_start = now;
    }

    /// Record the state of the joint at `drive_index()`.
    ///
    /// Advances only on `OperationEnabled`. Returns `true` if this
    /// observation completed commissioning.
    pub fn observe_drive_state(&mut self, state: DriveState) -> bool {
        if self.phase != CommissioningPhase::EnablingDrives {
            return false;
        }
        if state == DriveState::OperationEnabled {
            self.drive_index += 1;
        }
        if self.drive_index >= self.joints {
            info!("All {} joints operation enabled, commissioning complete", self.joints);
            self.phase = CommissioningPhase::Complete;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arm_common::cia402::status_word_for;

    fn channel() -> JointChannel {
        JointChannel {
            control_word: 0,
            status_word: 2,
            actual_position: 4,
            target_position: 8,
        }
    }

    fn image(status: u16, control: u16, actual: i32, target: i32) -> [u8; 12] {
        let mut data = [0u8; 12];
        data[0..2].copy_from_slice(&control.to_le_bytes());
        data[2..4].copy_from_slice(&status.to_le_bytes());
        data[4..8].copy_from_slice(&actual.to_le_bytes());
        data[8..12].copy_from_slice(&target.to_le_bytes());
        data
    }

    #[test]
    fn every_tabled_pattern_yields_state_and_control_word() {
        let cases = [
            (0x0000, DriveState::NotReady, None),
            (0x0040, DriveState::SwitchOnDisabled, Some(0x0006)),
            (0x0021, DriveState::ReadyToSwitchOn, Some(0x0007)),
            (0x0023, DriveState::SwitchedOn, Some(0x000F)),
            (0x0027, DriveState::OperationEnabled, None),
            (0x0007, DriveState::QuickStopActive, Some(0x000F)),
            (0x000F, DriveState::FaultReactionActive, Some(0x0080)),
            (0x0008, DriveState::Fault, Some(0x0080)),
        ];
        let ch = channel();
        for (status, state, cw) in cases {
            let mut sm = DriveStateMachine::new("j1");
            let mut data = image(status, 0x0000, 0, 0);
            let upd = sm.update(&mut data, &ch);
            assert_eq!(upd.state, state, "status {status:#06x}");
            assert_eq!(upd.control_word, cw, "status {status:#06x}");
            assert_eq!(ch.control_word(&data), cw.unwrap_or(0));
        }
    }

    #[test]
    fn unmatched_pattern_keeps_state_and_control_word() {
        let ch = channel();
        let mut sm = DriveStateMachine::new("j1");
        let mut data = image(status_word_for(DriveState::SwitchedOn), 0x0007, 5, 5);
        sm.update(&mut data, &ch);
        assert_eq!(sm.state(), DriveState::SwitchedOn);

        let mut data = image(0x0001, 0x1234, 5, 5);
        let upd = sm.update(&mut data, &ch);
        assert_eq!(upd.state, DriveState::SwitchedOn);
        assert!(!upd.changed);
        assert_eq!(upd.control_word, None);
        assert_eq!(ch.control_word(&data), 0x1234);
    }

    #[test]
    fn switched_on_aligns_target_with_actual() {
        let ch = channel();
        let mut sm = DriveStateMachine::new("j3");
        let mut data = image(0x0023, 0x0007, 4242, 0);
        let upd = sm.update(&mut data, &ch);
        assert_eq!(upd.aligned_target, Some(4242));
        assert_eq!(ch.target_position(&data), 4242);

        let upd = sm.update(&mut data, &ch);
        assert_eq!(upd.aligned_target, None);
        assert!(!upd.changed);
    }

    #[test]
    fn fault_keeps_other_control_bits() {
        let ch = channel();
        let mut sm = DriveStateMachine::new("j2");
        let mut data = image(0x0218, 0x000F, 0, 0);
        let upd = sm.update(&mut data, &ch);
        assert_eq!(upd.control_word, Some(0x008F));
        assert!(upd.state.is_fault());
    }

    #[test]
    fn op_phase_advances_only_on_operational() {
        let t0 = Instant::now();
        let mut c = Commissioning::new(3, Duration::from_secs(10), t0);
        assert!(!c.observe_operational("j1", false));
        assert_eq!(c.op_index(), 0);
        assert!(!c.observe_operational("j1", true));
        assert!(!c.observe_operational("j2", true));
        assert_eq!(c.op_index(), 2);
        assert!(c.observe_operational("j3", true));
        assert_eq!(c.phase(), CommissioningPhase::EnablingDrives);
    }

    #[test]
    fn drive_phase_advances_only_on_operation_enabled() {
        let t0 = Instant::now();
        let mut c = Commissioning::new(2, Duration::from_secs(10), t0);
        c.observe_operational("j1", true);
        c.observe_operational("j2", true);

        for state in [
            DriveState::NotReady,
            DriveState::SwitchOnDisabled,
            DriveState::ReadyToSwitchOn,
            DriveState::SwitchedOn,
            DriveState::QuickStopActive,
            DriveState::Fault,
        ] {
            assert!(!c.observe_drive_state(state));
            assert_eq!(c.drive_index(), 0);
        }
        assert!(!c.observe_drive_state(DriveState::OperationEnabled));
        assert_eq!(c.drive_index(), 1);
        assert!(c.observe_drive_state(DriveState::OperationEnabled));
        assert!(c.is_complete());

        // Further observations never move the index.
        assert!(!c.observe_drive_state(DriveState::OperationEnabled));
        assert_eq!(c.drive_index(), 2);
    }

    #[test]
    fn timeout_window_restarts_after_reset() {
        let t0 = Instant::now();
        let mut c = Commissioning::new(1, Duration::from_secs(10), t0);
        assert!(!c.timed_out(t0 + Duration::from_millis(9_999)));
        assert!(c.timed_out(t0 + Duration::from_secs(10)));

        c.restart_window(t0 + Duration::from_secs(10));
        assert_eq!(c.resets(), 1);
        assert!(!c.timed_out(t0 + Duration::from_secs(15)));
        assert!(c.timed_out(t0 + Duration::from_secs(20)));
    }

    #[test]
    fn no_timeout_once_operational() {
        let t0 = Instant::now();
        let mut c = Commissioning::new(1, Duration::from_secs(10), t0);
        c.observe_operational("j1", true);
        assert!(!c.timed_out(t0 + Duration::from_secs(60)));
    }
}
