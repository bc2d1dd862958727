//! Timestamp widths and wrap-around arithmetic.
//!
//! Timestamps are kept in fine units and masked to the full width. The
//! coarse part (`ts >> fine_width`) counts clock cycles.

use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Timestamp geometry shared by both ends of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// Sub-cycle bits. Default: 3.
    pub fine_width: u32,
    /// Total timestamp bits. Default: 63.
    pub full_width: u32,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            fine_width: 3,
            full_width: 63,
        }
    }
}

impl TimestampConfig {
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.full_width < 2 || self.full_width > 64 || self.fine_width >= self.full_width {
            return Err(NodeError::InvalidTimestampWidth {
                fine: self.fine_width,
                full: self.full_width,
            });
        }
        Ok(())
    }

    fn mask(&self) -> u64 {
        if self.full_width >= u64::BITS {
            u64::MAX
        } else {
            (1 << self.full_width) - 1
        }
    }

    /// Whether `ts` fits the full width.
    pub fn fits(&self, ts: u64) -> bool {
        ts & !self.mask() == 0
    }

    /// Reduce `ts` modulo the full width.
    pub fn wrap(&self, ts: u64) -> u64 {
        ts & self.mask()
    }

    pub fn coarse(&self, ts: u64) -> u64 {
        self.wrap(ts) >> self.fine_width
    }

    pub fn fine(&self, ts: u64) -> u64 {
        ts & ((1 << self.fine_width) - 1)
    }

    /// Build a timestamp from a cycle count and a sub-cycle offset.
    pub fn join(&self, coarse: u64, fine: u64) -> u64 {
        self.wrap((coarse << self.fine_width) | self.fine(fine))
    }

    /// Whether `now` has reached `deadline`, both in fine units.
    ///
    /// Serial arithmetic: `deadline` counts as reached when it lies at most
    /// half the range behind `now`.
    pub fn is_reached(&self, now: u64, deadline: u64) -> bool {
        let diff = self.wrap(now.wrapping_sub(deadline));
        diff < 1 << (self.full_width - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn coarse_fine_split() {
        let ts = TimestampConfig::default();
        let t = ts.join(1000, 5);
        assert_eq!(t, 8005);
        assert_eq!(ts.coarse(t), 1000);
        assert_eq!(ts.fine(t), 5);
    }

    #[test]
    fn width_checks() {
        let ts = TimestampConfig::default();
        assert!(ts.fits((1 << 63) - 1));
        assert!(!ts.fits(1 << 63));
        assert!(ts.validate().is_ok());
        assert!(TimestampConfig {
            fine_width: 8,
            full_width: 8
        }
        .validate()
        .is_err());
    }

    #[test]
    fn deadline_across_wrap() {
        let ts = TimestampConfig {
            fine_width: 0,
            full_width: 8,
        };
        assert!(ts.is_reached(5, 250));
        assert!(!ts.is_reached(250, 5));
        assert!(ts.is_reached(10, 10));
    }

    proptest! {
        #[test]
        fn reached_is_monotonic_within_horizon(now in 0u64..(1 << 62), ahead in 1u64..(1 << 61)) {
            let ts = TimestampConfig::default();
            prop_assert!(ts.is_reached(now + ahead, now));
            prop_assert!(!ts.is_reached(now, now + ahead));
        }
    }
}
