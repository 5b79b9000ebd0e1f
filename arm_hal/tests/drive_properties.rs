//! Property tests for the per-joint CiA402 state machine over arbitrary
//! process images.

use arm_common::cia402::{self, DriveState};
use arm_hal::domain::{JointChannel, SIGNALS};
use arm_hal::drive::DriveStateMachine;
use proptest::prelude::*;

/// Channel with the signals packed from offset 0, as the domain lays out a
/// single joint.
fn packed_channel() -> JointChannel {
    let mut channel = JointChannel::default();
    let mut offset = 0;
    for spec in SIGNALS {
        channel.set_offset(spec.signal, offset);
        offset += spec.byte_len();
    }
    channel
}

fn image(channel: &JointChannel, cw: u16, sw: u16, actual: i32, target: i32) -> Vec<u8> {
    let mut data = vec![0u8; channel.end()];
    data[channel.control_word..channel.control_word + 2].copy_from_slice(&cw.to_le_bytes());
    data[channel.status_word..channel.status_word + 2].copy_from_slice(&sw.to_le_bytes());
    data[channel.actual_position..channel.actual_position + 4]
        .copy_from_slice(&actual.to_le_bytes());
    data[channel.target_position..channel.target_position + 4]
        .copy_from_slice(&target.to_le_bytes());
    data
}

proptest! {
    #[test]
    fn control_word_follows_classification(
        cw in any::<u16>(),
        sw in any::<u16>(),
        actual in any::<i32>(),
        target in any::<i32>(),
    ) {
        let channel = packed_channel();
        let mut data = image(&channel, cw, sw, actual, target);
        let mut drive = DriveStateMachine::new("j1");

        let update = drive.update(&mut data, &channel);

        match cia402::classify(sw) {
            None => {
                prop_assert_eq!(update.control_word, None);
                prop_assert_eq!(channel.control_word(&data), cw);
                prop_assert_eq!(drive.state(), DriveState::NotReady);
            }
            Some(row) => {
                let expected = row.action.apply(cw);
                prop_assert_eq!(update.control_word, expected);
                prop_assert_eq!(channel.control_word(&data), expected.unwrap_or(cw));
                prop_assert_eq!(drive.state(), row.state);
            }
        }

        // Status and actual position are inputs and never written.
        prop_assert_eq!(channel.status_word(&data), sw);
        prop_assert_eq!(channel.actual_position(&data), actual);
    }

    #[test]
    fn target_aligned_only_when_switched_on(
        cw in any::<u16>(),
        sw in any::<u16>(),
        actual in any::<i32>(),
        target in any::<i32>(),
    ) {
        let channel = packed_channel();
        let mut data = image(&channel, cw, sw, actual, target);
        let mut drive = DriveStateMachine::new("j1");

        let update = drive.update(&mut data, &channel);

        if update.state == DriveState::SwitchedOn && cia402::classify(sw).is_some() {
            prop_assert_eq!(channel.target_position(&data), actual);
            prop_assert_eq!(update.aligned_target, (target != actual).then_some(actual));
        } else {
            prop_assert_eq!(channel.target_position(&data), target);
            prop_assert_eq!(update.aligned_target, None);
        }
    }
}
