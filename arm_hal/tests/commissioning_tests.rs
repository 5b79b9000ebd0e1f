//! Commissioning of a six-joint simulated arm.
//!
//! Verifies that:
//! 1. Startup writes every profile parameter and seeds the command table
//! 2. Joints are walked to OperationEnabled one at a time, in bus order
//! 3. The OP window expiry resets the master and opens a new window

mod common;

use std::time::Duration;

use arm_common::cia402::DriveState;
use arm_common::config::ArmConfig;
use arm_common::consts::{MODE_CSP, objects};
use arm_common::fieldbus::coe_object;
use arm_hal::drive::CommissioningPhase;
use arm_hal::drivers::simulation::SimOptions;
use arm_hal::sdo::profile_parameters;
use common::{FakeClock, INITIAL_POSITIONS, cycle_until, cycles, sim_options, start};

#[test]
fn test_startup_writes_profile_parameters() {
    let (exchange, handle) = start(sim_options());
    let config = ArmConfig::default();

    for (j, joint) in config.joints.iter().enumerate() {
        let pos = j as u16;
        for param in profile_parameters(joint.class) {
            let stored = handle.sdo_value(pos, param.sdo).expect("object exists");
            assert_eq!(
                &stored[..],
                &param.value.to_le_bytes()[..param.value.size()],
                "joint {} {}",
                j,
                param.name
            );
        }

        let mode = handle
            .sdo_value(pos, coe_object(objects::MODE_OF_OPERATION, 0))
            .expect("mode object");
        assert_eq!(mode, vec![MODE_CSP as u8]);

        let velocity = handle
            .sdo_value(pos, coe_object(objects::PROFILE_VELOCITY, 0))
            .expect("velocity object");
        assert_eq!(
            u32::from_le_bytes(velocity.try_into().expect("4 bytes")),
            joint.class.max_velocity() / 2
        );

        let target = handle
            .sdo_value(pos, coe_object(objects::TARGET_POSITION, 0))
            .expect("target object");
        assert_eq!(
            i32::from_le_bytes(target.try_into().expect("4 bytes")),
            INITIAL_POSITIONS[j]
        );
    }

    let commands = exchange.context().commands();
    for (j, &pos) in INITIAL_POSITIONS.iter().enumerate() {
        assert_eq!(commands.load(j), Some(pos));
    }
    assert_eq!(
        exchange.context().commissioning().phase(),
        CommissioningPhase::AwaitingOperational
    );
    assert!(!handle.released());
}

#[test]
fn test_joints_enabled_in_bus_order() {
    let (mut exchange, handle) = start(sim_options());
    let mut clock = FakeClock::new(Duration::from_millis(1));
    let mut enabled_at: [Option<usize>; 6] = [None; 6];

    for n in 0..500 {
        exchange.cycle(clock.tick());
        for (j, slot) in enabled_at.iter_mut().enumerate() {
            if slot.is_none() && handle.drive_state(j as u16) == Some(DriveState::OperationEnabled)
            {
                *slot = Some(n);
                // Nothing behind the joint being commissioned moves.
                for later in j + 1..6 {
                    assert_ne!(
                        handle.drive_state(later as u16),
                        Some(DriveState::OperationEnabled),
                        "joint {} enabled before joint {}",
                        later,
                        j
                    );
                }
            }
        }
        if exchange.context().commissioning().is_complete() {
            break;
        }
    }

    assert!(exchange.context().commissioning().is_complete());
    let order: Vec<usize> = enabled_at
        .iter()
        .map(|n| n.expect("every joint enabled"))
        .collect();
    assert!(
        order.windows(2).all(|w| w[0] < w[1]),
        "enable order {:?}",
        order
    );
    assert_eq!(exchange.context().commissioning().resets(), 0);
    assert_eq!(handle.resets(), 0);

    for drive in exchange.context().drives() {
        assert_eq!(drive.state(), DriveState::OperationEnabled);
    }
}

#[test]
fn test_commissioned_arm_holds_position() {
    let (mut exchange, handle, mut clock) = common::commissioned(sim_options());
    cycles(&mut exchange, &mut clock, 5);

    for (j, &pos) in INITIAL_POSITIONS.iter().enumerate() {
        assert_eq!(handle.target_position(j as u16), Some(pos), "joint {j}");
        assert_eq!(handle.actual_position(j as u16), Some(pos), "joint {j}");
    }
}

#[test]
fn test_op_timeout_resets_master() {
    let options = SimOptions {
        op_delay_cycles: 0,
        ..sim_options()
    };
    let (mut exchange, handle) = start(options);
    handle.set_resets_required(2);
    let mut clock = FakeClock::new(Duration::from_millis(100));

    // Default window is 10 s: 100 cycles of 100 ms.
    cycles(&mut exchange, &mut clock, 100);
    assert_eq!(handle.resets(), 0);
    assert_eq!(exchange.context().commissioning().op_index(), 0);

    cycles(&mut exchange, &mut clock, 1);
    assert_eq!(handle.resets(), 1);
    assert_eq!(exchange.context().commissioning().resets(), 1);

    cycles(&mut exchange, &mut clock, 50);
    assert_eq!(handle.resets(), 1, "new window must not expire early");

    cycles(&mut exchange, &mut clock, 50);
    assert_eq!(handle.resets(), 2);

    cycle_until(&mut exchange, &mut clock, 200, |ex| {
        ex.context().commissioning().is_complete()
    });
    assert_eq!(handle.resets(), 2);
    assert_eq!(exchange.context().commissioning().resets(), 2);
}

#[test]
fn test_single_stuck_joint_blocks_later_joints() {
    let (mut exchange, handle) = start(sim_options());
    handle.set_never_operational(3, true);
    let mut clock = FakeClock::new(Duration::from_millis(1));

    cycle_until(&mut exchange, &mut clock, 100, |ex| {
        ex.context().commissioning().op_index() == 3
    });
    cycles(&mut exchange, &mut clock, 100);

    let commissioning = exchange.context().commissioning();
    assert_eq!(commissioning.phase(), CommissioningPhase::AwaitingOperational);
    assert_eq!(commissioning.op_index(), 3);
    assert!(handle.is_operational(4));
    for j in 0..6u16 {
        assert_ne!(handle.drive_state(j), Some(DriveState::OperationEnabled));
    }

    handle.set_never_operational(3, false);
    cycle_until(&mut exchange, &mut clock, 500, |ex| {
        ex.context().commissioning().is_complete()
    });
    assert_eq!(handle.resets(), 0);
}
