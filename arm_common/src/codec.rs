//! Encoder counts ↔ radians conversion.
//!
//! The joint drives report a single-turn absolute position in raw encoder
//! counts. Positions within `[-max_count, max_count]` (half a revolution each
//! way) scale linearly. Anything outside that band is folded back by exactly
//! one revolution. The fold is a one-shot correction and keeps no state; it
//! does not unwrap multi-turn motion, and values beyond two half-turns are
//! folded by the same single step without further correction.

use std::f64::consts::TAU;

use crate::consts::DEFAULT_COUNTS_PER_REVOLUTION;

/// Stateless converter between raw encoder counts and radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionCodec {
    counts_per_radian: f64,
    max_count: i32,
}

impl PositionCodec {
    /// Create a codec for an encoder with the given resolution.
    ///
    /// `max_count` is half of `counts_per_revolution`.
    pub fn new(counts_per_revolution: u32) -> Self {
        let counts_per_revolution = counts_per_revolution.max(2);
        Self {
            counts_per_radian: f64::from(counts_per_revolution) / TAU,
            max_count: (counts_per_revolution / 2) as i32,
        }
    }

    /// Largest count magnitude converted without folding.
    #[inline]
    pub const fn max_count(&self) -> i32 {
        self.max_count
    }

    /// Scale factor [counts/rad].
    #[inline]
    pub const fn counts_per_radian(&self) -> f64 {
        self.counts_per_radian
    }

    /// Convert raw counts to radians, folding once on overflow.
    #[inline]
    pub fn counts_to_radians(&self, counts: i32) -> f64 {
        self.fold(counts) as f64 / self.counts_per_radian
    }

    /// Convert radians to the nearest raw count value.
    ///
    /// Saturates at the `i32` range.
    #[inline]
    pub fn radians_to_counts(&self, radians: f64) -> i32 {
        let counts = (radians * self.counts_per_radian).round();
        if counts.is_nan() {
            0
        } else {
            counts.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
        }
    }

    /// Single-step fold into `[-max_count, max_count]`.
    #[inline]
    fn fold(&self, counts: i32) -> i64 {
        let counts = i64::from(counts);
        let max = i64::from(self.max_count);
        if counts > max {
            counts - 2 * max
        } else if counts < -max {
            counts + 2 * max
        } else {
            counts
        }
    }
}

impl Default for PositionCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTS_PER_REVOLUTION)
    }
}
