//! Arm interface configuration.
//!
//! Every setting of the arm interface lives in one TOML file. Missing fields
//! fall back to the defaults in [`crate::consts`], so an empty `[shared]`
//! section with a service name is already a complete configuration for a
//! six-joint arm.
//!
//! # Usage
//!
//! ```rust,no_run
//! use arm_common::config::{ArmConfig, ConfigError, ConfigLoader};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = ArmConfig::load(Path::new("arm.toml"))?;
//!     config.validate()?;
//!     println!("{} joints", config.joints.len());
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::consts::{
    DEFAULT_COMMISSIONING_TIMEOUT_S, DEFAULT_COUNTS_PER_REVOLUTION, DEFAULT_CYCLE_TIME_US,
    DEFAULT_MASTER_REQUEST_TIMEOUT_MS, DEFAULT_PUBLISH_PERIOD_MS, DEFAULT_SDO_TIMEOUT_MS,
    MAX_JOINTS, NUM_JOINTS, ZEROERR_EROB_PRODUCT_CODE, ZEROERR_VENDOR_ID,
};

/// Failure to load or validate an arm configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("Arm configuration file not found")]
    FileNotFound,

    /// File unreadable or not valid TOML for [`ArmConfig`].
    #[error("Invalid arm configuration file: {0}")]
    ParseError(String),

    /// Well-formed file with inconsistent values.
    #[error("Invalid arm configuration: {0}")]
    ValidationError(String),
}

/// Default verbosity of the binary, overridden by `RUST_LOG` and `--verbose`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-cycle detail.
    Trace,
    /// Debug information, including periodic cycle statistics.
    Debug,
    /// Lifecycle and state-change messages.
    #[default]
    Info,
    /// Recoverable conditions such as commissioning timeouts.
    Warn,
    /// Fatal startup failures.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Instance name and log level.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "arm-hal-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Default log level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance name shown in logs.
    pub service_name: String,
}

impl SharedConfig {
    /// Reject an empty `service_name`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(invalid("shared.service_name is empty"));
        }
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: "arm_hal".to_string(),
        }
    }
}

/// TOML file loading, implemented for every deserializable type.
///
/// A missing file is `FileNotFound`; any other read or syntax failure is
/// `ParseError`. Validation is left to the caller.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Read and deserialize `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Joint hardware ─────────────────────────────────────────────────

/// Drive family of a joint. Selects the motion-profile limits written
/// during commissioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JointClass {
    /// eRob110H120: shoulder and elbow joints.
    Erob110h120,
    /// eRob70H100: wrist joints.
    Erob70h100,
}

impl JointClass {
    /// Maximum speed [counts/s].
    pub const fn max_velocity(self) -> u32 {
        match self {
            Self::Erob110h120 => 262_144,
            Self::Erob70h100 => 349_525,
        }
    }

    /// Maximum acceleration and deceleration [counts/s²].
    pub const fn max_acceleration(self) -> u32 {
        match self {
            Self::Erob110h120 => 2_621_440,
            Self::Erob70h100 => 3_495_253,
        }
    }

    /// Profile velocity written at startup: half of the maximum.
    pub const fn profile_velocity(self) -> u32 {
        self.max_velocity() / 2
    }

    /// Profile acceleration and deceleration written at startup: a tenth of
    /// the maximum.
    pub const fn profile_acceleration(self) -> u32 {
        self.max_acceleration() / 10
    }
}

/// One joint of the arm, in bus order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointConfig {
    /// Name published with every state message.
    pub name: String,
    /// Drive family.
    pub class: JointClass,
}

/// Expected EEPROM identity of every joint slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveIdentity {
    /// Vendor id.
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u32,
    /// Product code.
    #[serde(default = "default_product_code")]
    pub product_code: u32,
}

impl Default for SlaveIdentity {
    fn default() -> Self {
        Self {
            vendor_id: ZEROERR_VENDOR_ID,
            product_code: ZEROERR_EROB_PRODUCT_CODE,
        }
    }
}

/// Encoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Single-turn resolution [counts/rev].
    #[serde(default = "default_counts_per_revolution")]
    pub counts_per_revolution: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            counts_per_revolution: DEFAULT_COUNTS_PER_REVOLUTION,
        }
    }
}

// ─── Top-level configuration ────────────────────────────────────────

/// Full arm interface configuration.
///
/// # TOML Example
///
/// ```toml
/// cycle_time_us = 1000
/// publish_period_ms = 20
///
/// [shared]
/// service_name = "arm_hal"
///
/// [[joints]]
/// name = "j1"
/// class = "erob110h120"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmConfig {
    /// Logging and instance name.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Cyclic exchange period [µs].
    #[serde(default = "default_cycle_time_us")]
    pub cycle_time_us: u32,

    /// State publication period [ms].
    #[serde(default = "default_publish_period_ms")]
    pub publish_period_ms: u32,

    /// Window for all joints to reach OP before the master is reset [s].
    #[serde(default = "default_commissioning_timeout_s")]
    pub commissioning_timeout_s: u32,

    /// Timeout of a single SDO transaction [ms].
    #[serde(default = "default_sdo_timeout_ms")]
    pub sdo_timeout_ms: u32,

    /// Index of the EtherCAT master to request.
    #[serde(default)]
    pub master_index: u32,

    /// Upper bound for the master request retry loop [ms].
    #[serde(default = "default_master_request_timeout_ms")]
    pub master_request_timeout_ms: u32,

    /// Encoder settings.
    #[serde(default)]
    pub codec: CodecConfig,

    /// Expected slave identity.
    #[serde(default)]
    pub slave: SlaveIdentity,

    /// Joints in bus order. Joint `i` is the slave at ring position `i`.
    #[serde(default = "default_joints")]
    pub joints: Vec<JointConfig>,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            cycle_time_us: DEFAULT_CYCLE_TIME_US,
            publish_period_ms: DEFAULT_PUBLISH_PERIOD_MS,
            commissioning_timeout_s: DEFAULT_COMMISSIONING_TIMEOUT_S,
            sdo_timeout_ms: DEFAULT_SDO_TIMEOUT_MS,
            master_index: 0,
            master_request_timeout_ms: DEFAULT_MASTER_REQUEST_TIMEOUT_MS,
            codec: CodecConfig::default(),
            slave: SlaveIdentity::default(),
            joints: default_joints(),
        }
    }
}

impl ArmConfig {
    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `shared.service_name` is empty
    /// - `cycle_time_us` is zero, or the publish period is not longer than one cycle
    /// - any timeout is zero
    /// - the joint list is empty or longer than `MAX_JOINTS`
    /// - a joint name is empty or duplicated
    /// - `codec.counts_per_revolution` is below 2
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.cycle_time_us == 0 {
            return Err(invalid("cycle_time_us must be > 0"));
        }
        if u64::from(self.publish_period_ms) * 1000 <= u64::from(self.cycle_time_us) {
            return Err(invalid(format!(
                "publish_period_ms ({}) must be longer than one cycle ({} us)",
                self.publish_period_ms, self.cycle_time_us
            )));
        }
        if self.commissioning_timeout_s == 0 {
            return Err(invalid("commissioning_timeout_s must be > 0"));
        }
        if self.sdo_timeout_ms == 0 {
            return Err(invalid("sdo_timeout_ms must be > 0"));
        }
        if self.master_request_timeout_ms == 0 {
            return Err(invalid("master_request_timeout_ms must be > 0"));
        }
        if self.codec.counts_per_revolution < 2 {
            return Err(invalid("codec.counts_per_revolution must be >= 2"));
        }

        if self.joints.is_empty() || self.joints.len() > MAX_JOINTS {
            return Err(invalid(format!(
                "joint count {} outside 1..={}",
                self.joints.len(),
                MAX_JOINTS
            )));
        }
        let mut seen = HashSet::with_capacity(self.joints.len());
        for (i, joint) in self.joints.iter().enumerate() {
            if joint.name.is_empty() {
                return Err(invalid(format!("joints[{i}].name cannot be empty")));
            }
            if !seen.insert(joint.name.as_str()) {
                return Err(invalid(format!("duplicate joint name '{}'", joint.name)));
            }
        }
        Ok(())
    }

    /// Number of configured joints.
    #[inline]
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// Cycle period.
    pub fn cycle_time(&self) -> Duration {
        Duration::from_micros(u64::from(self.cycle_time_us))
    }

    /// State publication period.
    pub fn publish_period(&self) -> Duration {
        Duration::from_millis(u64::from(self.publish_period_ms))
    }

    /// OP readiness window.
    pub fn commissioning_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.commissioning_timeout_s))
    }

    /// Per-transaction SDO timeout.
    pub fn sdo_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.sdo_timeout_ms))
    }

    /// Master request deadline.
    pub fn master_request_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.master_request_timeout_ms))
    }

    /// Joint names in bus order.
    pub fn joint_names(&self) -> Vec<String> {
        self.joints.iter().map(|j| j.name.clone()).collect()
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

fn default_cycle_time_us() -> u32 {
    DEFAULT_CYCLE_TIME_US
}

fn default_publish_period_ms() -> u32 {
    DEFAULT_PUBLISH_PERIOD_MS
}

fn default_commissioning_timeout_s() -> u32 {
    DEFAULT_COMMISSIONING_TIMEOUT_S
}

fn default_sdo_timeout_ms() -> u32 {
    DEFAULT_SDO_TIMEOUT_MS
}

fn default_master_request_timeout_ms() -> u32 {
    DEFAULT_MASTER_REQUEST_TIMEOUT_MS
}

fn default_counts_per_revolution() -> u32 {
    DEFAULT_COUNTS_PER_REVOLUTION
}

fn default_vendor_id() -> u32 {
    ZEROERR_VENDOR_ID
}

fn default_product_code() -> u32 {
    ZEROERR_EROB_PRODUCT_CODE
}

/// `j1..j6`; the first three joints carry the larger drive.
fn default_joints() -> Vec<JointConfig> {
    (0..NUM_JOINTS)
        .map(|i| JointConfig {
            name: format!("j{}", i + 1),
            class: if i < 3 {
                JointClass::Erob110h120
            } else {
                JointClass::Erob70h100
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Warn.as_directive(), "warn");
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize)]
        struct TestWrapper {
            level: LogLevel,
        }

        for (text, level) in [
            ("trace", LogLevel::Trace),
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warn", LogLevel::Warn),
            ("error", LogLevel::Error),
        ] {
            let parsed: TestWrapper = toml::from_str(&format!("level = \"{text}\"")).unwrap();
            assert_eq!(parsed.level, level);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ArmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.joint_count(), NUM_JOINTS);
        assert_eq!(config.joint_names(), ["j1", "j2", "j3", "j4", "j5", "j6"]);
        assert_eq!(config.joints[2].class, JointClass::Erob110h120);
        assert_eq!(config.joints[3].class, JointClass::Erob70h100);
        assert_eq!(config.cycle_time(), Duration::from_millis(1));
    }

    #[test]
    fn test_joint_class_profile_values() {
        let big = JointClass::Erob110h120;
        assert_eq!(big.profile_velocity(), big.max_velocity() / 2);
        assert_eq!(big.profile_acceleration(), big.max_acceleration() / 10);
        assert!(JointClass::Erob70h100.max_velocity() > big.max_velocity());
    }

    #[test]
    fn test_validation_rejects_zero_cycle() {
        let config = ArmConfig {
            cycle_time_us: 0,
            ..ArmConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_rejects_publish_faster_than_cycle() {
        let config = ArmConfig {
            cycle_time_us: 5000,
            publish_period_ms: 5,
            ..ArmConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_names() {
        let mut config = ArmConfig::default();
        config.joints[4].name = "j1".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate joint name"));
    }

    #[test]
    fn test_validation_rejects_empty_joint_list() {
        let config = ArmConfig {
            joints: Vec::new(),
            ..ArmConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = ArmConfig::load(Path::new("/nonexistent/path/arm.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[shared]
service_name = "arm-test"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = ArmConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.service_name, "arm-test");
        assert_eq!(config.cycle_time_us, DEFAULT_CYCLE_TIME_US);
        assert_eq!(config.slave, SlaveIdentity::default());
        assert_eq!(config.joint_count(), NUM_JOINTS);
        assert!(config.validate().is_ok());
    }
}
