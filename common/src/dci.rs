//! DCI and slot allocation records exchanged between MAC and PHY

use crate::sfnsf::SfnSf;
use crate::types::Rnti;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Direction of a DCI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DciFormat {
    Dl = 0,
    Ul = 1,
}

/// Kind of symbol-level allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarTtiType {
    /// Sounding reference signal
    Srs = 0,
    /// Shared-channel data
    Data = 1,
    /// Control channel
    Ctrl = 2,
    /// Random access message 3
    Msg3 = 3,
}

/// Time-domain DCI: who is scheduled, on which symbols and RBGs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DciInfo {
    pub rnti: Rnti,
    pub format: DciFormat,
    pub sym_start: u8,
    pub num_sym: u8,
    pub mcs: u8,
    pub rank: u8,
    pub tb_size: u32,
    pub ndi: u8,
    pub rv: u8,
    pub var_tti_type: VarTtiType,
    pub bwp_index: u16,
    pub harq_process: u8,
    /// One flag per resource block group
    pub rbg_bitmask: Vec<bool>,
    pub tpc: u8,
}

impl DciInfo {
    pub fn new(
        rnti: Rnti,
        format: DciFormat,
        var_tti_type: VarTtiType,
        sym_start: u8,
        num_sym: u8,
        rbg_bitmask: Vec<bool>,
    ) -> Self {
        Self {
            rnti,
            format,
            sym_start,
            num_sym,
            mcs: 0,
            rank: 1,
            tb_size: 0,
            ndi: 1,
            rv: 0,
            var_tti_type,
            bwp_index: 0,
            harq_process: 0,
            rbg_bitmask,
            tpc: 1,
        }
    }

    /// Number of RBGs set in the bitmask
    pub fn rbg_count(&self) -> usize {
        self.rbg_bitmask.iter().filter(|b| **b).count()
    }

    /// First symbol after this allocation
    pub fn sym_end(&self) -> u8 {
        self.sym_start + self.num_sym
    }
}

impl fmt::Display for DciInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} rnti {} sym {}+{} mcs {} harq {}",
            self.var_tti_type,
            self.format,
            self.rnti,
            self.sym_start,
            self.num_sym,
            self.mcs,
            self.harq_process
        )
    }
}

/// Symbol-level allocation entry of a slot
#[derive(Debug, Clone, PartialEq)]
pub struct VarTtiAllocInfo {
    pub dci: Arc<DciInfo>,
}

impl VarTtiAllocInfo {
    pub fn new(dci: DciInfo) -> Self {
        Self { dci: Arc::new(dci) }
    }
}

impl From<Arc<DciInfo>> for VarTtiAllocInfo {
    fn from(dci: Arc<DciInfo>) -> Self {
        Self { dci }
    }
}

/// Pending random access response, filled by the MAC
#[derive(Debug, Clone, PartialEq)]
pub struct RarInfo {
    pub ra_preamble_id: u8,
    pub ul_msg3_dci: Arc<DciInfo>,
    /// Slots between the RAR and the Msg3 transmission; set by the PHY
    pub k2_delay: u32,
}

/// Directions a slot allocation covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationType {
    #[default]
    None,
    Dl,
    Ul,
    Both,
}

impl AllocationType {
    fn union(self, other: AllocationType) -> AllocationType {
        use AllocationType::*;
        match (self, other) {
            (None, x) | (x, None) => x,
            (a, b) if a == b => a,
            _ => Both,
        }
    }
}

/// Everything scheduled for one slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotAllocInfo {
    pub sfn: SfnSf,
    /// Symbols consumed by the allocations of this slot
    pub num_sym_alloc: u32,
    pub var_tti_alloc_info: VecDeque<VarTtiAllocInfo>,
    pub alloc_type: AllocationType,
    pub build_rar_list: Vec<RarInfo>,
}

impl SlotAllocInfo {
    /// Empty allocation for `sfn`
    pub fn new(sfn: SfnSf) -> Self {
        Self {
            sfn,
            num_sym_alloc: 0,
            var_tti_alloc_info: VecDeque::new(),
            alloc_type: AllocationType::None,
            build_rar_list: Vec::new(),
        }
    }

    /// Append an allocation and account for its symbols
    pub fn push(&mut self, dci: DciInfo) {
        self.num_sym_alloc += dci.num_sym as u32;
        self.alloc_type = self.alloc_type.union(match dci.format {
            DciFormat::Dl => AllocationType::Dl,
            DciFormat::Ul => AllocationType::Ul,
        });
        self.var_tti_alloc_info.push_back(VarTtiAllocInfo::new(dci));
    }

    /// Absorb `other`, which must describe the same slot. Entries are
    /// appended in the order they arrive.
    pub fn merge(&mut self, other: SlotAllocInfo) {
        debug_assert_eq!(self.sfn, other.sfn);
        self.num_sym_alloc += other.num_sym_alloc;
        self.alloc_type = self.alloc_type.union(other.alloc_type);
        self.var_tti_alloc_info.extend(other.var_tti_alloc_info);
        self.build_rar_list.extend(other.build_rar_list);
    }

    /// Stable sort of the entries by first symbol
    pub fn sort_by_sym_start(&mut self) {
        self.var_tti_alloc_info
            .make_contiguous()
            .sort_by_key(|a| a.dci.sym_start);
    }

    pub fn is_empty(&self) -> bool {
        self.var_tti_alloc_info.is_empty()
    }

    fn any(&self, f: impl Fn(&DciInfo) -> bool) -> bool {
        self.var_tti_alloc_info.iter().any(|a| f(&a.dci))
    }

    pub fn contains_data_allocation(&self) -> bool {
        self.any(|d| d.var_tti_type == VarTtiType::Data)
    }

    pub fn contains_dl_ctrl_allocation(&self) -> bool {
        self.any(|d| d.var_tti_type == VarTtiType::Ctrl && d.format == DciFormat::Dl)
    }

    /// UL control or SRS
    pub fn contains_ul_ctrl_allocation(&self) -> bool {
        self.any(|d| {
            (d.var_tti_type == VarTtiType::Ctrl || d.var_tti_type == VarTtiType::Srs)
                && d.format == DciFormat::Ul
        })
    }

    pub fn contains_ul_msg3_allocation(&self) -> bool {
        self.any(|d| d.var_tti_type == VarTtiType::Msg3 && d.format == DciFormat::Ul)
    }
}

impl fmt::Display for SlotAllocInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {} ({} symbols):", self.sfn, self.num_sym_alloc)?;
        for alloc in &self.var_tti_alloc_info {
            write!(f, " [{}]", alloc.dci)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sfn() -> SfnSf {
        SfnSf::new(0, 1, 0, 0)
    }

    fn dci(ty: VarTtiType, format: DciFormat, sym_start: u8, num_sym: u8) -> DciInfo {
        DciInfo::new(Rnti(1), format, ty, sym_start, num_sym, vec![true, false, true])
    }

    #[test]
    fn test_push_accounts_symbols() {
        let mut info = SlotAllocInfo::new(sfn());
        info.push(dci(VarTtiType::Ctrl, DciFormat::Dl, 0, 1));
        info.push(dci(VarTtiType::Data, DciFormat::Dl, 1, 12));
        assert_eq!(info.num_sym_alloc, 13);
        assert_eq!(info.alloc_type, AllocationType::Dl);
        info.push(dci(VarTtiType::Ctrl, DciFormat::Ul, 13, 1));
        assert_eq!(info.alloc_type, AllocationType::Both);
    }

    #[test]
    fn test_merge_appends_without_sorting() {
        let mut a = SlotAllocInfo::new(sfn());
        a.push(dci(VarTtiType::Ctrl, DciFormat::Ul, 13, 1));
        let mut b = SlotAllocInfo::new(sfn());
        b.push(dci(VarTtiType::Ctrl, DciFormat::Dl, 0, 1));
        a.merge(b);

        let starts: Vec<u8> = a.var_tti_alloc_info.iter().map(|v| v.dci.sym_start).collect();
        assert_eq!(starts, vec![13, 0]);
        assert_eq!(a.num_sym_alloc, 2);

        a.sort_by_sym_start();
        let starts: Vec<u8> = a.var_tti_alloc_info.iter().map(|v| v.dci.sym_start).collect();
        assert_eq!(starts, vec![0, 13]);
    }

    #[test]
    fn test_contains_predicates() {
        let mut info = SlotAllocInfo::new(sfn());
        assert!(!info.contains_data_allocation());
        info.push(dci(VarTtiType::Srs, DciFormat::Ul, 12, 1));
        assert!(info.contains_ul_ctrl_allocation());
        assert!(!info.contains_dl_ctrl_allocation());
        info.push(dci(VarTtiType::Msg3, DciFormat::Ul, 4, 2));
        assert!(info.contains_ul_msg3_allocation());
        assert!(!info.contains_data_allocation());
    }

    #[test]
    fn test_rbg_count() {
        let d = dci(VarTtiType::Data, DciFormat::Dl, 1, 2);
        assert_eq!(d.rbg_count(), 2);
        assert_eq!(d.sym_end(), 3);
    }
}
