//! Startup failure paths.
//!
//! Every failure must abort before the cyclic loop exists, name the joint it
//! happened on, and leave the master released.

mod common;

use arm_common::config::ArmConfig;
use arm_common::consts::objects;
use arm_common::fieldbus::{SlaveId, coe_object};
use arm_hal::drivers::simulation::{ABORT_NO_OBJECT, SimHandle, SimOptions, SimulatedMaster};
use arm_hal::{ArmContext, StartupError};
use common::{sim_options, start, try_start};

/// Start with faults injected before startup; the startup must fail.
fn expect_failure(
    options: SimOptions,
    config: ArmConfig,
    inject: impl FnOnce(&SimHandle),
) -> (StartupError, SimHandle) {
    let master = SimulatedMaster::new(options);
    let handle = master.handle();
    inject(&handle);
    match ArmContext::startup(config, Box::new(master)) {
        Ok(_) => panic!("startup should fail"),
        Err(e) => (e, handle),
    }
}

#[test]
fn test_sdo_abort_is_fatal() {
    let sdo = coe_object(objects::PROFILE_VELOCITY, 0);
    let (err, handle) = expect_failure(sim_options(), ArmConfig::default(), |h| {
        h.fail_sdo(2, sdo, ABORT_NO_OBJECT)
    });

    match err {
        StartupError::SdoTransfer { joint, sdo: failed, .. } => {
            assert_eq!(joint, 2);
            assert_eq!(failed, sdo);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(handle.released());
}

#[test]
fn test_readback_mismatch_is_fatal() {
    let sdo = coe_object(objects::MODE_OF_OPERATION, 0);
    let (err, handle) = expect_failure(sim_options(), ArmConfig::default(), |h| {
        h.corrupt_readback(4, sdo)
    });

    match err {
        StartupError::SdoMismatch {
            joint,
            written,
            read,
            ..
        } => {
            assert_eq!(joint, 4);
            assert_eq!(written, 8);
            assert_eq!(read, 9);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(handle.released());
}

#[test]
fn test_slave_config_failure_names_joint() {
    let (err, handle) = expect_failure(sim_options(), ArmConfig::default(), |h| {
        h.fail_slave_config(3)
    });
    assert!(matches!(err, StartupError::SlaveConfig { joint: 3, .. }), "{err}");
    assert_eq!(err.joint(), Some(3));
    assert!(handle.released());
}

#[test]
fn test_pdo_mapping_failure_names_joint() {
    let (err, handle) = expect_failure(sim_options(), ArmConfig::default(), |h| {
        h.fail_pdo_config(1)
    });
    assert!(matches!(err, StartupError::PdoMapping { joint: 1, .. }), "{err}");
    assert!(handle.released());
}

#[test]
fn test_activation_failure() {
    let (err, handle) =
        expect_failure(sim_options(), ArmConfig::default(), |h| h.fail_activation());
    assert!(matches!(err, StartupError::Activation(_)), "{err}");
    assert!(handle.released());
}

#[test]
fn test_identity_mismatch_rejected() {
    let options = SimOptions {
        identity: SlaveId {
            vendor_id: 0x0000_0002,
            product_code: 0x1234_5678,
        },
        ..sim_options()
    };
    let (err, handle) = expect_failure(options, ArmConfig::default(), |_| {});
    assert!(matches!(err, StartupError::SlaveConfig { joint: 0, .. }), "{err}");
    assert!(err.to_string().contains("identity mismatch"));
    assert!(handle.released());
}

#[test]
fn test_missing_slave_rejected() {
    let options = SimOptions {
        joints: 4,
        ..sim_options()
    };
    let (err, handle) = expect_failure(options, ArmConfig::default(), |_| {});
    assert!(matches!(err, StartupError::SlaveConfig { joint: 4, .. }), "{err}");
    assert!(handle.released());
}

#[test]
fn test_master_unavailable_gives_up() {
    let config = ArmConfig {
        master_index: 1,
        master_request_timeout_ms: 100,
        ..ArmConfig::default()
    };
    let (result, handle) = try_start(sim_options(), config);
    match result {
        Err(StartupError::MasterUnavailable { index, attempts, .. }) => {
            assert_eq!(index, 1);
            assert!(attempts >= 2, "attempts = {attempts}");
            assert_eq!(handle.request_attempts(), attempts);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("startup should fail"),
    }
}

#[test]
fn test_master_request_retries_until_available() {
    let options = SimOptions {
        unavailable_requests: 3,
        ..sim_options()
    };
    let (exchange, handle) = start(options);
    assert_eq!(handle.request_attempts(), 4);
    assert!(exchange.context().lifecycle().is_active());
}

#[test]
fn test_invalid_config_rejected_before_master() {
    let config = ArmConfig {
        cycle_time_us: 0,
        ..ArmConfig::default()
    };
    let (result, handle) = try_start(sim_options(), config);
    assert!(matches!(result, Err(StartupError::Config(_))));
    assert_eq!(handle.request_attempts(), 0);
}

#[test]
fn test_drop_releases_master() {
    let (exchange, handle) = start(sim_options());
    assert!(!handle.released());
    drop(exchange);
    assert!(handle.released());
}

#[test]
fn test_shutdown_releases_master() {
    let (mut exchange, handle) = start(sim_options());
    exchange.shutdown();
    assert!(handle.released());
    assert!(exchange.context().lifecycle().is_released());
}
