//! Process-data domain layout.
//!
//! Every joint exchanges the same four signals:
//!
//! | Signal          | Object | Bits | Direction | PDO    |
//! |-----------------|--------|------|-----------|--------|
//! | control word    | 0x6040 | 16   | out       | 0x1600 |
//! | status word     | 0x6041 | 16   | in        | 0x1A00 |
//! | actual position | 0x6064 | 32   | in        | 0x1A00 |
//! | target position | 0x607A | 32   | out       | 0x1600 |
//!
//! Entries are registered in table order. The byte offsets returned by the
//! master are stored once in a [`JointChannel`] per joint and never change.
//! All values are little-endian.

use arm_common::consts::{MAX_JOINTS, objects};
use arm_common::fieldbus::{
    PdoCfg, PdoEntryIdx, PdoEntryInfo, PdoEntryPos, PdoIdx, SmCfg, SmIdx, SyncConfig,
    SyncDirection, WatchdogMode, pdo_entry,
};
use heapless::Vec as FixedVec;
use static_assertions::const_assert;

/// Signal carried in the process image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Controlword (u16, output).
    ControlWord,
    /// Statusword (u16, input).
    StatusWord,
    /// Position actual value (i32, input).
    ActualPosition,
    /// Target position (i32, output).
    TargetPosition,
}

/// One row of the static signal list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalSpec {
    /// Signal.
    pub signal: Signal,
    /// Mapped object index (sub-index 0).
    pub index: u16,
    /// Name used in the PDO mapping.
    pub name: &'static str,
    /// Size in bits.
    pub bit_len: u8,
}

impl SignalSpec {
    /// Size in bytes.
    pub const fn byte_len(&self) -> usize {
        self.bit_len as usize / 8
    }

    /// Mapped PDO entry.
    pub fn entry(&self) -> PdoEntryIdx {
        pdo_entry(self.index, 0)
    }

    /// Mapping record at position `pos` inside its PDO.
    fn mapping(&self, pos: u8) -> PdoEntryInfo {
        PdoEntryInfo {
            entry_idx: self.entry(),
            bit_len: self.bit_len,
            name: self.name.to_string(),
            pos: PdoEntryPos::from(pos),
        }
    }
}

/// Signal list in registration order.
pub const SIGNALS: [SignalSpec; 4] = [
    SignalSpec {
        signal: Signal::ControlWord,
        index: objects::CONTROL_WORD,
        name: "control word",
        bit_len: 16,
    },
    SignalSpec {
        signal: Signal::StatusWord,
        index: objects::STATUS_WORD,
        name: "status word",
        bit_len: 16,
    },
    SignalSpec {
        signal: Signal::ActualPosition,
        index: objects::POSITION_ACTUAL,
        name: "position actual value",
        bit_len: 32,
    },
    SignalSpec {
        signal: Signal::TargetPosition,
        index: objects::TARGET_POSITION,
        name: "target position",
        bit_len: 32,
    },
];

/// Process data bytes per joint.
pub const BYTES_PER_JOINT: usize = 12;

const_assert!(BYTES_PER_JOINT == 2 + 2 + 4 + 4);

/// Sync manager layout of one eRob drive.
///
/// SM0/SM1 are the mailbox, SM2 carries RxPDO 0x1600 (control word, target
/// position), SM3 carries TxPDO 0x1A00 (status word, actual position).
pub fn sync_configs() -> Vec<SyncConfig> {
    let sm = |idx: u8, direction, watchdog_mode| SmCfg {
        idx: SmIdx::from(idx),
        direction,
        watchdog_mode,
    };
    vec![
        SyncConfig {
            sm: sm(0, SyncDirection::Output, WatchdogMode::Disable),
            pdos: Vec::new(),
        },
        SyncConfig {
            sm: sm(1, SyncDirection::Input, WatchdogMode::Disable),
            pdos: Vec::new(),
        },
        SyncConfig {
            sm: sm(2, SyncDirection::Output, WatchdogMode::Enable),
            pdos: vec![PdoCfg {
                idx: PdoIdx::from(objects::RX_PDO_MAPPING),
                entries: vec![SIGNALS[0].mapping(0), SIGNALS[3].mapping(1)],
            }],
        },
        SyncConfig {
            sm: sm(3, SyncDirection::Input, WatchdogMode::Disable),
            pdos: vec![PdoCfg {
                idx: PdoIdx::from(objects::TX_PDO_MAPPING),
                entries: vec![SIGNALS[1].mapping(0), SIGNALS[2].mapping(1)],
            }],
        },
    ]
}

// ─── Joint channel ──────────────────────────────────────────────────

/// Byte offsets of one joint's signals in the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JointChannel {
    /// Controlword offset.
    pub control_word: usize,
    /// Statusword offset.
    pub status_word: usize,
    /// Actual position offset.
    pub actual_position: usize,
    /// Target position offset.
    pub target_position: usize,
}

impl JointChannel {
    /// Store the offset of `signal`.
    pub fn set_offset(&mut self, signal: Signal, offset: usize) {
        match signal {
            Signal::ControlWord => self.control_word = offset,
            Signal::StatusWord => self.status_word = offset,
            Signal::ActualPosition => self.actual_position = offset,
            Signal::TargetPosition => self.target_position = offset,
        }
    }

    /// One past the highest byte used by this joint.
    pub fn end(&self) -> usize {
        (self.control_word + 2)
            .max(self.status_word + 2)
            .max(self.actual_position + 4)
            .max(self.target_position + 4)
    }

    /// Controlword.
    #[inline]
    pub fn control_word(&self, data: &[u8]) -> u16 {
        read_u16(data, self.control_word)
    }

    /// Write the controlword.
    #[inline]
    pub fn set_control_word(&self, data: &mut [u8], value: u16) {
        write_bytes(data, self.control_word, &value.to_le_bytes());
    }

    /// Statusword.
    #[inline]
    pub fn status_word(&self, data: &[u8]) -> u16 {
        read_u16(data, self.status_word)
    }

    /// Position actual value [counts].
    #[inline]
    pub fn actual_position(&self, data: &[u8]) -> i32 {
        read_i32(data, self.actual_position)
    }

    /// Target position [counts].
    #[inline]
    pub fn target_position(&self, data: &[u8]) -> i32 {
        read_i32(data, self.target_position)
    }

    /// Write the target position [counts].
    #[inline]
    pub fn set_target_position(&self, data: &mut [u8], value: i32) {
        write_bytes(data, self.target_position, &value.to_le_bytes());
    }
}

// Out-of-range accesses read zero and drop writes. `DomainLayout::fits`
// is checked once at activation, so they do not happen on a live domain.

#[inline]
fn read_u16(data: &[u8], offset: usize) -> u16 {
    data.get(offset..offset + 2)
        .map_or(0, |b| u16::from_le_bytes([b[0], b[1]]))
}

#[inline]
fn read_i32(data: &[u8], offset: usize) -> i32 {
    data.get(offset..offset + 4)
        .map_or(0, |b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline]
fn write_bytes(data: &mut [u8], offset: usize, bytes: &[u8]) {
    if let Some(dst) = data.get_mut(offset..offset + bytes.len()) {
        dst.copy_from_slice(bytes);
    }
}

// ─── Domain layout ──────────────────────────────────────────────────

/// Offsets of every joint, indexed by joint id. Fixed after configuration.
#[derive(Debug, Clone, Default)]
pub struct DomainLayout {
    channels: FixedVec<JointChannel, MAX_JOINTS>,
}

impl DomainLayout {
    /// Empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next joint's channel. Returns it back if `MAX_JOINTS`
    /// channels are already present.
    pub fn push(&mut self, channel: JointChannel) -> Result<(), JointChannel> {
        self.channels.push(channel)
    }

    /// Channel of joint `joint`.
    #[inline]
    pub fn channel(&self, joint: usize) -> Option<&JointChannel> {
        self.channels.get(joint)
    }

    /// All channels in joint order.
    #[inline]
    pub fn channels(&self) -> &[JointChannel] {
        &self.channels
    }

    /// Number of joints.
    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no joint is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Minimum process data size covering every registered signal.
    pub fn required_size(&self) -> usize {
        self.channels.iter().map(JointChannel::end).max().unwrap_or(0)
    }

    /// Whether a process image of `len` bytes holds every signal.
    pub fn fits(&self, len: usize) -> bool {
        self.required_size() <= len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed_channel(base: usize) -> JointChannel {
        JointChannel {
            control_word: base,
            status_word: base + 2,
            actual_position: base + 4,
            target_position: base + 8,
        }
    }

    #[test]
    fn signal_list_order_and_sizes() {
        let total: usize = SIGNALS.iter().map(SignalSpec::byte_len).sum();
        assert_eq!(total, BYTES_PER_JOINT);
        assert_eq!(SIGNALS[0].signal, Signal::ControlWord);
        assert_eq!(SIGNALS[1].signal, Signal::StatusWord);
        assert_eq!(SIGNALS[2].signal, Signal::ActualPosition);
        assert_eq!(SIGNALS[3].signal, Signal::TargetPosition);
    }

    #[test]
    fn sync_layout_maps_every_signal_once() {
        let syncs = sync_configs();
        let mapped: Vec<_> = syncs
            .iter()
            .flat_map(|s| s.pdos.iter())
            .flat_map(|p| p.entries.iter().map(|e| e.entry_idx))
            .collect();
        assert_eq!(mapped.len(), SIGNALS.len());
        for spec in SIGNALS {
            assert!(mapped.contains(&spec.entry()));
        }
        assert_eq!(u16::from(syncs[2].pdos[0].idx), 0x1600);
        assert_eq!(u16::from(syncs[3].pdos[0].idx), 0x1A00);
        assert_eq!(syncs[2].sm.watchdog_mode, WatchdogMode::Enable);
    }

    #[test]
    fn little_endian_access() {
        let ch = packed_channel(0);
        let mut data = [0u8; BYTES_PER_JOINT];
        data[2] = 0x37;
        data[3] = 0x02;
        data[4..8].copy_from_slice(&(-123_456i32).to_le_bytes());

        assert_eq!(ch.status_word(&data), 0x0237);
        assert_eq!(ch.actual_position(&data), -123_456);

        ch.set_control_word(&mut data, 0x000F);
        ch.set_target_position(&mut data, 0x0102_0304);
        assert_eq!(&data[0..2], &[0x0F, 0x00]);
        assert_eq!(&data[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(ch.control_word(&data), 0x000F);
        assert_eq!(ch.target_position(&data), 0x0102_0304);
    }

    #[test]
    fn out_of_range_access_is_inert() {
        let ch = packed_channel(100);
        let mut data = [0u8; 8];
        assert_eq!(ch.status_word(&data), 0);
        ch.set_target_position(&mut data, 42);
        assert_eq!(data, [0u8; 8]);
    }

    #[test]
    fn layout_required_size() {
        let mut layout = DomainLayout::new();
        assert_eq!(layout.required_size(), 0);
        for j in 0..6 {
            layout.push(packed_channel(j * BYTES_PER_JOINT)).unwrap();
        }
        assert_eq!(layout.len(), 6);
        assert_eq!(layout.required_size(), 6 * BYTES_PER_JOINT);
        assert!(layout.fits(72));
        assert!(!layout.fits(71));
    }

    #[test]
    fn layout_capacity_is_bounded() {
        let mut layout = DomainLayout::new();
        for _ in 0..MAX_JOINTS {
            layout.push(JointChannel::default()).unwrap();
        }
        assert!(layout.push(JointChannel::default()).is_err());
    }
}
