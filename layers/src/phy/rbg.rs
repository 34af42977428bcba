//! Resource block group bookkeeping
//!
//! Converts RBG bitmasks to RB indices, keeps the per-symbol union of the
//! RBGs in use, and computes per-slot usage statistics.

use crate::LayerError;
use common::{DciFormat, DciInfo, Rnti, SlotAllocInfo, VarTtiAllocInfo, VarTtiType};
use std::collections::{BTreeMap, HashSet};
use tracing::trace;

/// First symbol of an allocation to the union of RBGs used from it
pub type RbgAllocationMap = BTreeMap<u8, Vec<bool>>;

/// RB indices covered by the set bits of `bitmask`, ascending
pub fn rbg_bitmask_to_rb_assignment(bitmask: &[bool], rb_per_rbg: u32) -> Vec<u32> {
    bitmask
        .iter()
        .enumerate()
        .filter(|(_, used)| **used)
        .flat_map(|(i, _)| {
            let first = i as u32 * rb_per_rbg;
            first..first + rb_per_rbg
        })
        .collect()
}

/// OR `dci`'s bitmask into the entry of its first symbol
pub fn store_rbg_allocation(map: &mut RbgAllocationMap, dci: &DciInfo) {
    let existing = map.entry(dci.sym_start).or_default();
    if existing.len() < dci.rbg_bitmask.len() {
        existing.resize(dci.rbg_bitmask.len(), false);
    }
    for (slot, used) in existing.iter_mut().zip(&dci.rbg_bitmask) {
        *slot |= *used;
    }
}

/// Per-symbol RBG maps of the slot being transmitted
#[derive(Debug, Default)]
pub struct RbgAllocator {
    rb_per_rbg: u32,
    /// DL data RBGs, used to spread the transmit power
    power_map: RbgAllocationMap,
}

impl RbgAllocator {
    pub fn new(rb_per_rbg: u32) -> Self {
        Self { rb_per_rbg, power_map: RbgAllocationMap::new() }
    }

    pub fn rb_per_rbg(&self) -> u32 {
        self.rb_per_rbg
    }

    pub fn set_rb_per_rbg(&mut self, rb_per_rbg: u32) {
        self.rb_per_rbg = rb_per_rbg;
    }

    pub fn to_rb_assignment(&self, bitmask: &[bool]) -> Vec<u32> {
        rbg_bitmask_to_rb_assignment(bitmask, self.rb_per_rbg)
    }

    /// Rebuild the power map from the slot allocations and return, for each
    /// first symbol, the RBs used by data in either direction.
    pub fn prepare<'a>(
        &mut self,
        allocations: impl IntoIterator<Item = &'a VarTtiAllocInfo>,
    ) -> Vec<(u8, Vec<u32>)> {
        self.power_map.clear();
        let mut stat_map = RbgAllocationMap::new();

        for alloc in allocations {
            let dci = &alloc.dci;
            if dci.var_tti_type == VarTtiType::Ctrl {
                continue;
            }
            if dci.format == DciFormat::Dl {
                store_rbg_allocation(&mut self.power_map, dci);
            }
            store_rbg_allocation(&mut stat_map, dci);
        }

        stat_map
            .iter()
            .map(|(sym, rbgs)| (*sym, self.to_rb_assignment(rbgs)))
            .collect()
    }

    /// RBs of all DL data starting at `sym_start`
    pub fn dl_rbs_at(&self, sym_start: u8) -> Option<Vec<u32>> {
        self.power_map
            .get(&sym_start)
            .map(|rbgs| self.to_rb_assignment(rbgs))
    }
}

/// Resource usage of one slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationStatistics {
    pub active_ues: usize,
    pub data_reg: u32,
    pub ctrl_reg: u32,
    pub data_sym: u32,
    pub ctrl_sym: u32,
}

/// Count UEs, REGs and symbols of a slot. Allocations sharing a first symbol
/// count their symbols once. The symbols counted must match `num_sym_alloc`.
pub fn allocation_statistics(
    info: &SlotAllocInfo,
    rb_per_rbg: u32,
) -> Result<AllocationStatistics, LayerError> {
    let mut active: HashSet<Rnti> = HashSet::new();
    let mut stats = AllocationStatistics::default();
    let mut last_sym_start: Option<u8> = None;
    let mut sym_used = 0u32;

    for alloc in &info.var_tti_alloc_info {
        let dci = &alloc.dci;
        if !dci.rnti.is_none() {
            active.insert(dci.rnti);
        }
        if last_sym_start.is_some_and(|last| last > dci.sym_start) {
            return Err(LayerError::InvalidState(format!(
                "allocations of {} are not ordered by symbol", info.sfn
            )));
        }

        let is_data = matches!(dci.var_tti_type, VarTtiType::Data | VarTtiType::Msg3);
        let reg_used = dci.rbg_count() as u32 * rb_per_rbg * dci.num_sym as u32;
        if is_data {
            stats.data_reg += reg_used;
        } else {
            stats.ctrl_reg += reg_used;
        }

        if last_sym_start != Some(dci.sym_start) {
            sym_used += dci.num_sym as u32;
            if is_data {
                stats.data_sym += dci.num_sym as u32;
            } else {
                stats.ctrl_sym += dci.num_sym as u32;
            }
        }
        last_sym_start = Some(dci.sym_start);
    }

    if sym_used != info.num_sym_alloc {
        return Err(LayerError::SymbolAccountingMismatch {
            sfn: info.sfn,
            declared: info.num_sym_alloc,
            used: sym_used,
        });
    }

    stats.active_ues = active.len();
    trace!("Statistics for {}: {:?}", info.sfn, stats);
    Ok(stats)
}
