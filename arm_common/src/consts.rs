//! System-wide constants for the arm workspace.
//!
//! Single source of truth for joint limits, default periods and the CoE
//! object dictionary indices used during drive commissioning.

use static_assertions::const_assert;

/// Number of joints on the arm.
pub const NUM_JOINTS: usize = 6;

/// Upper bound on configured joints (sizes every fixed-capacity table).
pub const MAX_JOINTS: usize = 16;

/// Default cyclic exchange period in microseconds (1 kHz).
pub const DEFAULT_CYCLE_TIME_US: u32 = 1000;

/// Default joint state publication period in milliseconds.
pub const DEFAULT_PUBLISH_PERIOD_MS: u32 = 20;

/// Window in which all joints must reach EtherCAT OP before a master reset.
pub const DEFAULT_COMMISSIONING_TIMEOUT_S: u32 = 10;

/// Per-transaction SDO timeout in milliseconds.
pub const DEFAULT_SDO_TIMEOUT_MS: u32 = 500;

/// Upper bound for waiting on the master to become available at startup.
pub const DEFAULT_MASTER_REQUEST_TIMEOUT_MS: u32 = 5000;

/// Encoder resolution of the joint drives (19-bit single-turn).
pub const DEFAULT_COUNTS_PER_REVOLUTION: u32 = 1 << 19;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/arm/arm.toml";

/// ZeroErr vendor id as reported in the slave EEPROM.
pub const ZEROERR_VENDOR_ID: u32 = 0x5A65_726F;

/// eRob joint module product code.
pub const ZEROERR_EROB_PRODUCT_CODE: u32 = 0x0002_9252;

/// Cyclic Synchronous Position mode of operation.
pub const MODE_CSP: i8 = 8;

/// Position following error window written to every drive [counts].
pub const POSITION_FOLLOWING_WINDOW: u32 = 10_000;

const_assert!(NUM_JOINTS <= MAX_JOINTS);
const_assert!(DEFAULT_CYCLE_TIME_US > 0);
const_assert!(DEFAULT_PUBLISH_PERIOD_MS * 1000 > DEFAULT_CYCLE_TIME_US);

/// CoE object dictionary indices (CiA402 drive profile).
pub mod objects {
    /// Controlword (RxPDO).
    pub const CONTROL_WORD: u16 = 0x6040;
    /// Statusword (TxPDO).
    pub const STATUS_WORD: u16 = 0x6041;
    /// Modes of operation.
    pub const MODE_OF_OPERATION: u16 = 0x6060;
    /// Position actual value (TxPDO).
    pub const POSITION_ACTUAL: u16 = 0x6064;
    /// Following error window.
    pub const FOLLOWING_ERROR_WINDOW: u16 = 0x6065;
    /// Target position (RxPDO).
    pub const TARGET_POSITION: u16 = 0x607A;
    /// Max profile velocity.
    pub const MAX_PROFILE_VELOCITY: u16 = 0x607F;
    /// Max motor speed.
    pub const MAX_VELOCITY: u16 = 0x6080;
    /// Profile velocity.
    pub const PROFILE_VELOCITY: u16 = 0x6081;
    /// Profile acceleration.
    pub const PROFILE_ACCELERATION: u16 = 0x6083;
    /// Profile deceleration.
    pub const PROFILE_DECELERATION: u16 = 0x6084;
    /// Target velocity.
    pub const TARGET_VELOCITY: u16 = 0x60FF;
    /// First receive PDO mapping.
    pub const RX_PDO_MAPPING: u16 = 0x1600;
    /// First transmit PDO mapping.
    pub const TX_PDO_MAPPING: u16 = 0x1A00;
}
