//! Common Types for 5G GNodeB
//!
//! Defines fundamental types used throughout the PHY substrate

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Numerology index (mu) as defined in TS 38.211 Table 4.2-1
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Spacing in kHz
    pub fn to_khz(&self) -> u32 {
        *self as u32
    }
}

/// Cyclic prefix type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclicPrefix {
    #[default]
    Normal,
    Extended,
}

impl CyclicPrefix {
    /// Number of OFDM symbols in one slot
    pub fn symbols_per_slot(&self) -> usize {
        match self {
            CyclicPrefix::Normal => 14,
            CyclicPrefix::Extended => 12,
        }
    }
}

/// Number of system frames before the SFN wraps
pub const NOF_SFNS: u32 = 1024;

/// Slot time coordinate
///
/// Counts slots since SFN 0, slot 0 and wraps every 1024 frames. Arithmetic and
/// comparison take the wrap into account: the distance between two slot points
/// is always the one that lies inside half of the wrap period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotPoint {
    numerology: u8,
    count: u32,
}

impl SlotPoint {
    /// Create a slot point from a raw slot count, wrapping it into range
    pub fn new(numerology: u8, count: u32) -> Self {
        assert!(numerology <= 4, "Invalid numerology {}", numerology);
        let modulus = Self::modulus_for(numerology);
        Self {
            numerology,
            count: count % modulus,
        }
    }

    /// Create a slot point from a system frame number and a slot index within the frame
    pub fn from_sfn_slot(numerology: u8, sfn: u32, slot_index: u32) -> Self {
        let slots_per_frame = Self::slots_per_frame_for(numerology);
        assert!(
            slot_index < slots_per_frame,
            "Slot index {} out of range for numerology {}",
            slot_index,
            numerology
        );
        Self::new(numerology, (sfn % NOF_SFNS) * slots_per_frame + slot_index)
    }

    fn slots_per_frame_for(numerology: u8) -> u32 {
        10 << numerology
    }

    fn modulus_for(numerology: u8) -> u32 {
        Self::slots_per_frame_for(numerology) * NOF_SFNS
    }

    /// Numerology index
    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    /// Number of slots per 10 ms frame
    pub fn nof_slots_per_frame(&self) -> u32 {
        Self::slots_per_frame_for(self.numerology)
    }

    /// Total number of distinct slot points before wrapping
    pub fn modulus(&self) -> u32 {
        Self::modulus_for(self.numerology)
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.count / self.nof_slots_per_frame()
    }

    /// Slot index within the frame
    pub fn slot_index(&self) -> u32 {
        self.count % self.nof_slots_per_frame()
    }

    /// Raw slot count since SFN 0, slot 0
    pub fn to_uint(&self) -> u32 {
        self.count
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_index())
    }
}

impl Add<i32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, rhs: i32) -> SlotPoint {
        let modulus = self.modulus() as i64;
        let count = (self.count as i64 + rhs as i64).rem_euclid(modulus);
        SlotPoint {
            numerology: self.numerology,
            count: count as u32,
        }
    }
}

impl AddAssign<i32> for SlotPoint {
    fn add_assign(&mut self, rhs: i32) {
        *self = *self + rhs;
    }
}

impl Sub<i32> for SlotPoint {
    type Output = SlotPoint;

    fn sub(self, rhs: i32) -> SlotPoint {
        self + (-rhs)
    }
}

impl SubAssign<i32> for SlotPoint {
    fn sub_assign(&mut self, rhs: i32) {
        *self = *self - rhs;
    }
}

impl Sub<SlotPoint> for SlotPoint {
    type Output = i32;

    /// Signed distance in slots, inside the window (-modulus/2, modulus/2]
    fn sub(self, rhs: SlotPoint) -> i32 {
        assert_eq!(
            self.numerology, rhs.numerology,
            "Cannot compare slot points of different numerology"
        );
        let modulus = self.modulus() as i64;
        let mut diff = (self.count as i64 - rhs.count as i64).rem_euclid(modulus);
        if diff > modulus / 2 {
            diff -= modulus;
        }
        diff as i32
    }
}

impl PartialOrd for SlotPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let diff = *self - *other;
        if diff as i64 == self.modulus() as i64 / 2 {
            // Half a period apart in both directions, order by raw count
            return Some(self.count.cmp(&other.count));
        }
        Some(diff.cmp(&0))
    }
}
