//! Startup SDO parameter initialization.
//!
//! Per joint, strictly in order, each download followed by an upload of the
//! same object whose value must match:
//!
//! | Object | Parameter            | Value                     |
//! |--------|----------------------|---------------------------|
//! | 0x60FF | target velocity      | 0                         |
//! | 0x6080 | max velocity         | class max                 |
//! | 0x607F | max profile velocity | class max                 |
//! | 0x6081 | profile velocity     | class max / 2             |
//! | 0x6083 | profile acceleration | class max / 10            |
//! | 0x6084 | profile deceleration | class max / 10            |
//! | 0x6065 | following window     | 10000                     |
//! | 0x6060 | mode of operation    | 8 (CSP)                   |
//! | 0x607A | target position      | current 0x6064            |
//!
//! Transfers block with a bounded timeout and only run before the cyclic
//! loop is scheduled.

use std::fmt;
use std::time::Duration;

use arm_common::config::{JointClass, JointConfig};
use arm_common::consts::{MODE_CSP, POSITION_FOLLOWING_WINDOW, objects};
use arm_common::fieldbus::{
    EthercatMaster, FieldbusError, ObjectLabel, SdoIdx, SlavePos, coe_object,
};
use arm_common::joint::JointCommandTable;
use tracing::{debug, info};

use crate::error::StartupError;

/// Typed CoE value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoeValue {
    /// INTEGER8.
    I8(i8),
    /// UNSIGNED32.
    U32(u32),
    /// INTEGER32.
    I32(i32),
}

impl CoeValue {
    /// Encoded size in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::I8(_) => 1,
            Self::U32(_) | Self::I32(_) => 4,
        }
    }

    /// Little-endian encoding; only the first `size()` bytes are meaningful.
    pub fn to_le_bytes(self) -> [u8; 4] {
        match self {
            Self::I8(v) => [v as u8, 0, 0, 0],
            Self::U32(v) => v.to_le_bytes(),
            Self::I32(v) => v.to_le_bytes(),
        }
    }

    /// Decode `bytes` as the same type as `self`.
    pub fn decode_like(self, bytes: &[u8]) -> Option<Self> {
        match self {
            Self::I8(_) => bytes.first().map(|&b| Self::I8(b as i8)),
            Self::U32(_) => four(bytes).map(|b| Self::U32(u32::from_le_bytes(b))),
            Self::I32(_) => four(bytes).map(|b| Self::I32(i32::from_le_bytes(b))),
        }
    }

    /// Widened numeric value.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::I8(v) => i64::from(v),
            Self::U32(v) => i64::from(v),
            Self::I32(v) => i64::from(v),
        }
    }
}

impl fmt::Display for CoeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

fn four(bytes: &[u8]) -> Option<[u8; 4]> {
    bytes.get(..4).and_then(|b| b.try_into().ok())
}

/// One motion-profile parameter written during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileParameter {
    /// Human readable name for logs.
    pub name: &'static str,
    /// Object.
    pub sdo: SdoIdx,
    /// Value written.
    pub value: CoeValue,
}

/// Ordered parameter list for a joint of `class`.
pub fn profile_parameters(class: JointClass) -> [ProfileParameter; 8] {
    let param = |name, index, value| ProfileParameter {
        name,
        sdo: coe_object(index, 0),
        value,
    };
    [
        param("target velocity", objects::TARGET_VELOCITY, CoeValue::I32(0)),
        param(
            "max velocity",
            objects::MAX_VELOCITY,
            CoeValue::U32(class.max_velocity()),
        ),
        param(
            "max profile velocity",
            objects::MAX_PROFILE_VELOCITY,
            CoeValue::U32(class.max_velocity()),
        ),
        param(
            "profile velocity",
            objects::PROFILE_VELOCITY,
            CoeValue::U32(class.profile_velocity()),
        ),
        param(
            "profile acceleration",
            objects::PROFILE_ACCELERATION,
            CoeValue::U32(class.profile_acceleration()),
        ),
        param(
            "profile deceleration",
            objects::PROFILE_DECELERATION,
            CoeValue::U32(class.profile_acceleration()),
        ),
        param(
            "position following window",
            objects::FOLLOWING_ERROR_WINDOW,
            CoeValue::U32(POSITION_FOLLOWING_WINDOW),
        ),
        param(
            "mode of operation",
            objects::MODE_OF_OPERATION,
            CoeValue::I8(MODE_CSP),
        ),
    ]
}

/// Writes and verifies the startup parameters of every joint.
pub struct SdoInitializer<'m> {
    master: &'m mut dyn EthercatMaster,
    timeout: Duration,
}

impl<'m> SdoInitializer<'m> {
    /// Initializer using `timeout` per transfer.
    pub fn new(master: &'m mut dyn EthercatMaster, timeout: Duration) -> Self {
        Self { master, timeout }
    }

    /// Initialize all joints in bus order and seed `commands` with their
    /// current positions.
    ///
    /// # Errors
    /// The first failed transfer or read-back mismatch aborts.
    pub fn initialize_all(
        &mut self,
        joints: &[JointConfig],
        commands: &JointCommandTable,
    ) -> Result<(), StartupError> {
        for (joint, cfg) in joints.iter().enumerate() {
            let position = self.initialize_joint(joint, cfg)?;
            commands.store(joint, position);
        }
        info!("Drive parameters written for {} joints", joints.len());
        Ok(())
    }

    /// Initialize one joint; returns its current position [counts].
    pub fn initialize_joint(
        &mut self,
        joint: usize,
        cfg: &JointConfig,
    ) -> Result<i32, StartupError> {
        for param in profile_parameters(cfg.class) {
            self.write_verified(joint, param.sdo, param.value)?;
            info!("Changed {}: {} for {}", param.name, param.value, cfg.name);
        }

        let actual_sdo = coe_object(objects::POSITION_ACTUAL, 0);
        let current = self.read(joint, actual_sdo, CoeValue::I32(0))?.as_i64() as i32;
        info!("Current position: {} (counts) for {}", current, cfg.name);

        self.write_verified(
            joint,
            coe_object(objects::TARGET_POSITION, 0),
            CoeValue::I32(current),
        )?;
        info!("Target position: {} (counts) for {}", current, cfg.name);

        Ok(current)
    }

    /// Download `value` and verify it by upload.
    pub fn write_verified(
        &mut self,
        joint: usize,
        sdo: SdoIdx,
        value: CoeValue,
    ) -> Result<(), StartupError> {
        let position = slave_position(joint, sdo)?;
        let bytes = value.to_le_bytes();
        self.master
            .sdo_download(position, sdo, &bytes[..value.size()], self.timeout)
            .map_err(|source| StartupError::SdoTransfer { joint, sdo, source })?;

        let read = self.read(joint, sdo, value)?;
        if read != value {
            return Err(StartupError::SdoMismatch {
                joint,
                sdo,
                written: value.as_i64(),
                read: read.as_i64(),
            });
        }
        debug!("Joint {} SDO {} = {} verified", joint, ObjectLabel::from(sdo), value);
        Ok(())
    }

    /// Upload `sdo` and decode it with the type of `like`.
    fn read(&mut self, joint: usize, sdo: SdoIdx, like: CoeValue) -> Result<CoeValue, StartupError> {
        let position = slave_position(joint, sdo)?;
        let mut buf = [0u8; 4];
        let target = &mut buf[..like.size()];
        let n = self
            .master
            .sdo_upload(position, sdo, target, self.timeout)
            .map_err(|source| StartupError::SdoTransfer { joint, sdo, source })?;

        like.decode_like(&buf[..n.min(buf.len())])
            .ok_or_else(|| StartupError::SdoTransfer {
                joint,
                sdo,
                source: FieldbusError::SdoSize {
                    sdo,
                    expected: like.size(),
                    actual: n,
                },
            })
    }
}

fn slave_position(joint: usize, sdo: SdoIdx) -> Result<SlavePos, StartupError> {
    u16::try_from(joint)
        .map(SlavePos::from)
        .map_err(|_| StartupError::SdoTransfer {
            joint,
            sdo,
            source: FieldbusError::Io(format!("joint index {joint} out of range")),
        })
}
