//! Pending slot allocations and the MAC PDUs attached to them

use crate::LayerError;
use bytes::Bytes;
use common::{PacketBurst, Rnti, SfnSf, SlotAllocInfo, VarTtiType};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Identifies the data allocation a packet burst belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BurstKey {
    pub sfn: SfnSf,
    pub sym_start: u8,
    pub rnti: Rnti,
}

impl BurstKey {
    pub fn new(sfn: SfnSf, sym_start: u8, rnti: Rnti) -> Self {
        Self { sfn, sym_start, rnti }
    }
}

/// Allocations sorted by slot, at most one entry per slot
#[derive(Debug, Default)]
pub struct SlotAllocationStore {
    allocations: VecDeque<SlotAllocInfo>,
    bursts: HashMap<BurstKey, PacketBurst>,
}

impl SlotAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotAllocInfo> {
        self.allocations.iter()
    }

    fn position(&self, sfn: &SfnSf) -> Option<usize> {
        self.allocations.iter().position(|a| a.sfn == *sfn)
    }

    /// Store `info`, merging it into the entry of the same slot if present
    pub fn push_back(&mut self, info: SlotAllocInfo) {
        debug!("Storing allocation for {}", info.sfn);
        if let Some(pos) = self.position(&info.sfn) {
            self.allocations[pos].merge(info);
            return;
        }
        let insert_at = self.allocations.partition_point(|a| a.sfn < info.sfn);
        self.allocations.insert(insert_at, info);
    }

    /// Put `info` first and renumber every entry to consecutive slots from
    /// `new_sfn`. Packet bursts of renumbered DATA allocations move with them.
    pub fn push_front(&mut self, new_sfn: SfnSf, info: SlotAllocInfo) {
        debug!("Pushing allocation of {} to the front as {}", info.sfn, new_sfn);
        self.allocations.push_front(info);

        let mut moved = Vec::new();
        let mut current = new_sfn;
        for alloc in self.allocations.iter_mut() {
            for var_tti in &alloc.var_tti_alloc_info {
                let dci = &var_tti.dci;
                if dci.var_tti_type != VarTtiType::Data {
                    continue;
                }
                let old_key = BurstKey::new(alloc.sfn, dci.sym_start, dci.rnti);
                if let Some(burst) = self.bursts.remove(&old_key) {
                    if !burst.is_empty() {
                        moved.push((BurstKey::new(current, dci.sym_start, dci.rnti), burst));
                    }
                }
            }
            alloc.sfn = current;
            current.add(1);
        }

        for (key, burst) in moved {
            self.bursts.entry(key).or_default().extend(burst);
        }
    }

    pub fn exists(&self, sfn: &SfnSf) -> bool {
        self.position(sfn).is_some()
    }

    pub fn peek(&self, sfn: &SfnSf) -> Result<&SlotAllocInfo, LayerError> {
        self.allocations
            .iter()
            .find(|a| a.sfn == *sfn)
            .ok_or(LayerError::SlotNotFound(*sfn))
    }

    pub fn peek_mut(&mut self, sfn: &SfnSf) -> Result<&mut SlotAllocInfo, LayerError> {
        self.allocations
            .iter_mut()
            .find(|a| a.sfn == *sfn)
            .ok_or(LayerError::SlotNotFound(*sfn))
    }

    /// Remove and return the allocation of `sfn`
    pub fn retrieve(&mut self, sfn: &SfnSf) -> Result<SlotAllocInfo, LayerError> {
        let pos = self.position(sfn).ok_or(LayerError::SlotNotFound(*sfn))?;
        self.allocations
            .remove(pos)
            .ok_or(LayerError::SlotNotFound(*sfn))
    }

    /// Append a MAC PDU to the burst of a data allocation
    pub fn set_mac_pdu(&mut self, pdu: Bytes, sfn: SfnSf, sym_start: u8, rnti: Rnti) {
        self.bursts
            .entry(BurstKey::new(sfn, sym_start, rnti))
            .or_default()
            .push(pdu);
    }

    /// Remove and return the burst of a data allocation
    pub fn take_packet_burst(&mut self, sfn: SfnSf, sym_start: u8, rnti: Rnti) -> Option<PacketBurst> {
        let burst = self.bursts.remove(&BurstKey::new(sfn, sym_start, rnti));
        if burst.is_none() {
            warn!("No packet burst for rnti {} at {} symbol {}", rnti, sfn, sym_start);
        }
        burst
    }

    pub fn has_packet_burst(&self, sfn: SfnSf, sym_start: u8, rnti: Rnti) -> bool {
        self.bursts.contains_key(&BurstKey::new(sfn, sym_start, rnti))
    }

    pub fn clear(&mut self) {
        self.allocations.clear();
        self.bursts.clear();
    }
}
