//! Joint command table, joint state snapshot and channel messages.
//!
//! Both tables are shared between the cyclic loop and slower contexts:
//!
//! | Table                | Writer          | Reader          | Protocol            |
//! |----------------------|-----------------|-----------------|---------------------|
//! | `JointCommandTable`  | command ingest  | cyclic loop     | per-slot atomics    |
//! | `JointStateSnapshot` | cyclic loop     | state publisher | seqlock (`write_seq`) |
//!
//! Neither allocates after construction.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering, fence};

use crate::codec::PositionCodec;

/// Reader retries before giving up on a snapshot.
const MAX_READ_RETRIES: usize = 16;

// ─── Command table ──────────────────────────────────────────────────

/// Latest commanded target position per joint [counts].
///
/// Latest write wins per slot. Slots are independent; a reader may observe
/// a mix of old and new entries while a command is being applied.
#[derive(Debug)]
pub struct JointCommandTable {
    slots: Box<[AtomicI32]>,
}

impl JointCommandTable {
    /// Table with `joints` slots, all zero.
    pub fn new(joints: usize) -> Self {
        Self {
            slots: (0..joints).map(|_| AtomicI32::new(0)).collect(),
        }
    }

    /// Number of joints.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table has no joints.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Store a raw target for one joint. Out-of-range indices are ignored.
    #[inline]
    pub fn store(&self, joint: usize, counts: i32) {
        if let Some(slot) = self.slots.get(joint) {
            slot.store(counts, Ordering::Release);
        }
    }

    /// Raw target of one joint, `None` if out of range.
    #[inline]
    pub fn load(&self, joint: usize) -> Option<i32> {
        self.slots.get(joint).map(|s| s.load(Ordering::Acquire))
    }

    /// Apply a list of targets in radians to the leading joints.
    ///
    /// The first `min(positions.len(), len())` entries are considered;
    /// trailing joints keep their previous command and surplus entries are
    /// dropped. NaN and infinite entries are skipped, so their slot keeps
    /// its previous command as well. Returns the number of slots written.
    pub fn apply_radians(&self, positions: &[f64], codec: &PositionCodec) -> usize {
        let mut applied = 0;
        for (slot, &rad) in self.slots.iter().zip(positions.iter()) {
            if rad.is_finite() {
                slot.store(codec.radians_to_counts(rad), Ordering::Release);
                applied += 1;
            }
        }
        applied
    }

    /// Copy all targets into `out` (shorter of the two lengths).
    pub fn copy_into(&self, out: &mut [i32]) {
        for (dst, slot) in out.iter_mut().zip(self.slots.iter()) {
            *dst = slot.load(Ordering::Acquire);
        }
    }
}

// ─── State snapshot ─────────────────────────────────────────────────

/// Encoder counts of all joints as of one cycle.
///
/// Single writer. `write_seq` follows the odd/even protocol:
/// - Odd = write in progress (reader must retry)
/// - Even = committed (reader can safely read the slots)
#[derive(Debug)]
pub struct JointStateSnapshot {
    write_seq: AtomicU32,
    cycle: AtomicU64,
    counts: Box<[AtomicI32]>,
}

impl JointStateSnapshot {
    /// Snapshot with `joints` slots, all zero.
    pub fn new(joints: usize) -> Self {
        Self {
            write_seq: AtomicU32::new(0),
            cycle: AtomicU64::new(0),
            counts: (0..joints).map(|_| AtomicI32::new(0)).collect(),
        }
    }

    /// Number of joints.
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether the snapshot has no joints.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Publish a full set of counts taken in cycle `cycle`.
    ///
    /// Must only be called from one thread.
    pub fn write(&self, cycle: u64, counts: &[i32]) {
        let seq = self.write_seq.load(Ordering::Relaxed);
        self.write_seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        for (slot, &c) in self.counts.iter().zip(counts.iter()) {
            slot.store(c, Ordering::Relaxed);
        }
        self.cycle.store(cycle, Ordering::Relaxed);

        self.write_seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Read a consistent copy into `out`; returns the cycle it was taken in.
    ///
    /// Returns `None` if the writer kept the sequence odd or moving for
    /// every retry. `out` contents are unspecified in that case.
    pub fn read_into(&self, out: &mut [i32]) -> Option<u64> {
        for _ in 0..MAX_READ_RETRIES {
            let before = self.write_seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            for (dst, slot) in out.iter_mut().zip(self.counts.iter()) {
                *dst = slot.load(Ordering::Relaxed);
            }
            let cycle = self.cycle.load(Ordering::Relaxed);

            fence(Ordering::Acquire);
            let after = self.write_seq.load(Ordering::Relaxed);
            if before == after {
                return Some(cycle);
            }
            std::hint::spin_loop();
        }
        None
    }

    /// Current write sequence (even when idle).
    #[inline]
    pub fn write_seq(&self) -> u32 {
        self.write_seq.load(Ordering::Acquire)
    }
}

// ─── Channel messages ───────────────────────────────────────────────

/// Inbound command: target positions [rad] for the leading joints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointCommand {
    /// Targets in bus order; may be shorter or longer than the joint count.
    pub positions: Vec<f64>,
}

impl JointCommand {
    /// Command from a slice of radians.
    pub fn new(positions: impl Into<Vec<f64>>) -> Self {
        Self {
            positions: positions.into(),
        }
    }
}

/// Outbound joint state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointStateMsg {
    /// Joint names in bus order.
    pub names: Vec<String>,
    /// Positions [rad], same order as `names`.
    pub positions: Vec<f64>,
    /// Loop cycle the positions were sampled in.
    pub cycle: u64,
}
