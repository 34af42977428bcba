//! System frame / subframe / slot identifier
//!
//! `SfnSf` is the logical clock of the slot engine. A frame has 10 subframes
//! and a subframe has `2^numerology` slots.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Subframes in one radio frame
pub const SUBFRAMES_PER_FRAME: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SfnSf {
    frame: u32,
    subframe: u8,
    slot: u8,
    numerology: u8,
}

impl SfnSf {
    /// # Panics
    ///
    /// If `subframe` is not below 10 or `slot` is not below `2^numerology`.
    pub fn new(frame: u32, subframe: u8, slot: u8, numerology: u8) -> Self {
        assert!(
            (subframe as u32) < SUBFRAMES_PER_FRAME,
            "subframe {} out of range",
            subframe
        );
        assert!(
            numerology < 32 && (slot as u32) < (1u32 << numerology),
            "slot {} out of range for numerology {}",
            slot,
            numerology
        );
        Self { frame, subframe, slot, numerology }
    }

    /// Build the identifier of the `index`-th slot since frame 0
    pub fn from_normalized(index: u64, numerology: u8) -> Self {
        let spsf = 1u64 << numerology;
        let slots_per_frame = spsf * SUBFRAMES_PER_FRAME as u64;
        Self {
            frame: (index / slots_per_frame) as u32,
            subframe: ((index % slots_per_frame) / spsf) as u8,
            slot: (index % spsf) as u8,
            numerology,
        }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn subframe(&self) -> u8 {
        self.subframe
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    pub fn slots_per_subframe(&self) -> u32 {
        1u32 << self.numerology
    }

    /// Number of slots elapsed since frame 0, subframe 0, slot 0
    pub fn normalize(&self) -> u64 {
        let spsf = self.slots_per_subframe() as u64;
        self.slot as u64
            + self.subframe as u64 * spsf
            + self.frame as u64 * SUBFRAMES_PER_FRAME as u64 * spsf
    }

    /// Advance by `slots`, carrying into subframe and frame
    pub fn add(&mut self, slots: u32) {
        let spsf = self.slots_per_subframe() as u64;
        let slot_sum = self.slot as u64 + slots as u64;
        let subframe_sum = self.subframe as u64 + slot_sum / spsf;

        self.frame += (subframe_sum / SUBFRAMES_PER_FRAME as u64) as u32;
        self.subframe = (subframe_sum % SUBFRAMES_PER_FRAME as u64) as u8;
        self.slot = (slot_sum % spsf) as u8;
    }

    /// Copy of `self` advanced by `slots`
    pub fn plus(&self, slots: u32) -> Self {
        let mut ret = *self;
        ret.add(slots);
        ret
    }
}

impl Ord for SfnSf {
    fn cmp(&self, other: &Self) -> Ordering {
        assert_eq!(
            self.numerology, other.numerology,
            "cannot compare slots of numerology {} and {}",
            self.numerology, other.numerology
        );
        (self.frame, self.subframe, self.slot).cmp(&(other.frame, other.subframe, other.slot))
    }
}

impl PartialOrd for SfnSf {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SfnSf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}/{}]", self.frame, self.subframe, self.slot)
    }
}
