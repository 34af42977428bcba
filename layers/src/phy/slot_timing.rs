//! DCI and HARQ timing derived from the slot pattern
//!
//! For every position of the pattern this module computes which grants must
//! be generated by the MAC, which DCIs go on air, and after how many slots the
//! DL HARQ feedback for data sent there can come back. Offsets are in slots.
//!
//! Slot types are compared by ordinal (`Dl < S < F < Ul`): a DCI can be sent
//! in any slot that is not UL, and HARQ feedback in any slot that is not DL.

use crate::LayerError;
use common::{modulo, SlotType, TddPattern};
use std::collections::BTreeMap;
use tracing::debug;

/// Control pipeline latency between MAC generation and transmission, in slots
pub const L1L2_CTRL_LATENCY: u32 = 2;

/// Pattern position to the list of slot offsets that apply there
pub type SlotOffsetMap = BTreeMap<usize, Vec<u32>>;

/// Processing delays, in slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingDelays {
    /// DL grant to DL data
    pub n0: u32,
    /// DL data to HARQ feedback
    pub n1: u32,
    /// UL grant to UL data
    pub n2: u32,
    pub l1l2_ctrl_latency: u32,
}

impl Default for ProcessingDelays {
    fn default() -> Self {
        Self { n0: 0, n1: 2, n2: 2, l1l2_ctrl_latency: L1L2_CTRL_LATENCY }
    }
}

impl ProcessingDelays {
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.n0 > 1 {
            return Err(LayerError::InvalidConfiguration(format!(
                "N0 delay {} out of range [0, 1]", self.n0
            )));
        }
        for (name, value) in [("N1", self.n1), ("N2", self.n2)] {
            if value > 4 {
                return Err(LayerError::InvalidConfiguration(format!(
                    "{} delay {} out of range [0, 4]", name, value
                )));
            }
        }
        Ok(())
    }
}

/// Where a DCI for a given data slot is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciSlot {
    /// Pattern position of the slot carrying the DCI
    pub index: usize,
    /// Slots between the DCI and the data
    pub k: u32,
}

/// Smallest `k1 >= n1` such that slot `pos + k1` can carry HARQ feedback.
/// `None` if no slot of the pattern can.
pub fn return_harq_slot(pattern: &[SlotType], pos: usize, n1: u32) -> Option<u32> {
    let n = pattern.len();
    (n1..n1 + n as u32).find(|k1| pattern[(pos + *k1 as usize) % n] >= SlotType::S)
}

/// Walk back from `pos` by `n` slots, then further until a slot that can carry
/// a DCI is found. `None` if no slot of the pattern can.
pub fn return_dci_slot(pattern: &[SlotType], pos: usize, n: u32) -> Option<DciSlot> {
    let len = pattern.len();
    (n..n + len as u32)
        .map(|k| DciSlot { index: modulo(pos as i64 - k as i64, len), k })
        .find(|slot| pattern[slot.index] <= SlotType::F)
}

/// Record the DCI for data at `pos`: the slot that sends it gets offset `k` in
/// `to_send`, and the slot `l1l2_ctrl_latency` earlier gets `k + latency` in
/// `generate`.
pub fn generate_dci_maps(
    pattern: &[SlotType],
    to_send: &mut SlotOffsetMap,
    generate: &mut SlotOffsetMap,
    pos: usize,
    n: u32,
    l1l2_ctrl_latency: u32,
) -> Result<(), LayerError> {
    let dci_slot = return_dci_slot(pattern, pos, n).ok_or_else(|| {
        LayerError::InvalidConfiguration(format!("no slot can carry a DCI for position {}", pos))
    })?;
    let index_gen = modulo(dci_slot.index as i64 - l1l2_ctrl_latency as i64, pattern.len());

    to_send.entry(dci_slot.index).or_default().push(dci_slot.k);
    generate
        .entry(index_gen)
        .or_default()
        .push(dci_slot.k + l1l2_ctrl_latency);
    Ok(())
}

/// All timing structures of a pattern
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DciMaps {
    pub to_send_dl: SlotOffsetMap,
    pub to_send_ul: SlotOffsetMap,
    pub generate_dl: SlotOffsetMap,
    pub generate_ul: SlotOffsetMap,
    pub dl_harq_fb_position: BTreeMap<usize, u32>,
}

impl DciMaps {
    /// Build the maps for `pattern`. A single-direction (FDD) pattern is
    /// processed as if every slot were flexible, then the generation map of
    /// the missing direction is dropped. The send maps are kept.
    pub fn from_pattern(pattern: &TddPattern, delays: &ProcessingDelays) -> Result<Self, LayerError> {
        let fdd_generation_pattern;
        let generation_pattern: &[SlotType] = if pattern.is_tdd() {
            pattern.slots()
        } else {
            fdd_generation_pattern = vec![SlotType::F; pattern.len()];
            &fdd_generation_pattern
        };

        let mut maps = DciMaps::default();
        for (i, slot_type) in generation_pattern.iter().enumerate() {
            let ul = matches!(slot_type, SlotType::Ul | SlotType::F);
            let dl = matches!(slot_type, SlotType::Dl | SlotType::S | SlotType::F);

            if dl {
                generate_dci_maps(
                    generation_pattern,
                    &mut maps.to_send_dl,
                    &mut maps.generate_dl,
                    i,
                    delays.n0,
                    delays.l1l2_ctrl_latency,
                )?;
            }
            if ul {
                generate_dci_maps(
                    generation_pattern,
                    &mut maps.to_send_ul,
                    &mut maps.generate_ul,
                    i,
                    delays.n2,
                    delays.l1l2_ctrl_latency,
                )?;
            }
            if dl {
                let k1 = return_harq_slot(generation_pattern, i, delays.n1).ok_or_else(|| {
                    LayerError::InvalidConfiguration(format!(
                        "no slot can carry HARQ feedback for position {}", i
                    ))
                })?;
                maps.dl_harq_fb_position.insert(i, k1);
            }
        }

        if !pattern.is_tdd() {
            if pattern.has_ul_slot() {
                maps.generate_dl.clear();
            } else {
                maps.generate_ul.clear();
            }
        }

        for list in maps
            .generate_dl
            .values_mut()
            .chain(maps.generate_ul.values_mut())
            .chain(maps.to_send_dl.values_mut())
            .chain(maps.to_send_ul.values_mut())
        {
            list.sort();
        }

        debug!(
            "Timing maps for pattern {}: generate DL {:?}, generate UL {:?}, HARQ {:?}",
            pattern, maps.generate_dl, maps.generate_ul, maps.dl_harq_fb_position
        );
        Ok(maps)
    }
}
