//! Common Utilities
//!
//! Provides timing helpers used across the GNodeB implementation

use crate::types::SubcarrierSpacing;
use std::time::Duration;

/// Time utilities for slot/frame calculations
pub mod time {
    use super::*;

    /// Slot duration in nanoseconds for different SCS
    pub fn slot_duration_ns(scs: SubcarrierSpacing) -> u64 {
        // 1 ms subframe divided into 2^mu slots
        1_000_000 >> scs.numerology()
    }

    /// Slot duration for different SCS
    pub fn slot_duration(scs: SubcarrierSpacing) -> Duration {
        Duration::from_nanos(slot_duration_ns(scs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_duration() {
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs15), Duration::from_millis(1));
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs30), Duration::from_micros(500));
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs120), Duration::from_micros(125));
        assert_eq!(time::slot_duration_ns(SubcarrierSpacing::Scs240), 62_500);
    }
}
