//! Round-robin scheduling state
//!
//! Per-UE buffers, the traffic each UE generates, and the symbol layout of a
//! slot by slot type.

use bytes::Bytes;
use common::{Rnti, SfnSf, SlotAllocInfo, SlotType};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Range;
use tracing::{debug, trace};

/// HARQ processes per UE and direction
pub const NUM_HARQ_PROCESSES: u8 = 16;

/// Highest MCS index of the 64QAM table
pub const MAX_MCS: u8 = 28;

/// Constant-rate traffic of one UE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficProfile {
    /// Bytes of every DL packet; 0 disables DL traffic
    #[serde(default)]
    pub dl_packet_bytes: u32,
    /// Bytes of UL data requested with every packet; 0 disables UL traffic
    #[serde(default)]
    pub ul_packet_bytes: u32,
    /// Slots between packets
    #[serde(default = "default_period_slots")]
    pub period_slots: u32,
}

fn default_period_slots() -> u32 {
    10
}

impl Default for TrafficProfile {
    fn default() -> Self {
        Self {
            dl_packet_bytes: 0,
            ul_packet_bytes: 0,
            period_slots: default_period_slots(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UeContext {
    pub rnti: Rnti,
    pub traffic: TrafficProfile,
    pub dl_queue: VecDeque<Bytes>,
    /// UL bytes the UE asked a grant for
    pub ul_pending: u32,
    /// Last wideband CQI reported
    pub cqi: Option<u8>,
    next_dl_harq: u8,
    next_ul_harq: u8,
}

impl UeContext {
    fn new(rnti: Rnti, traffic: TrafficProfile) -> Self {
        Self {
            rnti,
            traffic,
            dl_queue: VecDeque::new(),
            ul_pending: 0,
            cqi: None,
            next_dl_harq: 0,
            next_ul_harq: 0,
        }
    }

    pub fn next_dl_harq_process(&mut self) -> u8 {
        let id = self.next_dl_harq;
        self.next_dl_harq = (id + 1) % NUM_HARQ_PROCESSES;
        id
    }

    pub fn next_ul_harq_process(&mut self) -> u8 {
        let id = self.next_ul_harq;
        self.next_ul_harq = (id + 1) % NUM_HARQ_PROCESSES;
        id
    }

    /// MCS for the next transmission: from the last CQI, `default` without one
    pub fn mcs(&self, default: u8) -> u8 {
        match self.cqi {
            Some(cqi) => ((cqi.min(15) as u32 * MAX_MCS as u32) / 15) as u8,
            None => default,
        }
    }

    pub fn has_dl_data(&self) -> bool {
        !self.dl_queue.is_empty()
    }

    pub fn has_ul_data(&self) -> bool {
        self.ul_pending > 0
    }
}

/// UE list with independent DL and UL round-robin cursors
#[derive(Debug, Default)]
pub struct RoundRobinScheduler {
    ues: Vec<UeContext>,
    next_dl: usize,
    next_ul: usize,
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the RNTI is already known
    pub fn add_ue(&mut self, rnti: Rnti, traffic: TrafficProfile) -> bool {
        if self.ue(rnti).is_some() {
            return false;
        }
        debug!("Scheduler: added RNTI {} with {:?}", rnti, traffic);
        self.ues.push(UeContext::new(rnti, traffic));
        true
    }

    pub fn remove_ue(&mut self, rnti: Rnti) -> bool {
        let before = self.ues.len();
        self.ues.retain(|ue| ue.rnti != rnti);
        before != self.ues.len()
    }

    pub fn ue(&self, rnti: Rnti) -> Option<&UeContext> {
        self.ues.iter().find(|ue| ue.rnti == rnti)
    }

    pub fn ue_mut(&mut self, rnti: Rnti) -> Option<&mut UeContext> {
        self.ues.iter_mut().find(|ue| ue.rnti == rnti)
    }

    pub fn num_ues(&self) -> usize {
        self.ues.len()
    }

    /// Queue the packets every UE produces in slot `sfn`
    pub fn generate_traffic(&mut self, sfn: SfnSf) {
        let index = sfn.normalize();
        for ue in &mut self.ues {
            let period = ue.traffic.period_slots;
            if period == 0 || index % period as u64 != 0 {
                continue;
            }
            if ue.traffic.dl_packet_bytes > 0 {
                ue.dl_queue
                    .push_back(Bytes::from(vec![0u8; ue.traffic.dl_packet_bytes as usize]));
            }
            ue.ul_pending += ue.traffic.ul_packet_bytes;
            trace!("RNTI {} traffic at {}: {} DL packets queued", ue.rnti, sfn, ue.dl_queue.len());
        }
    }

    /// Next UE with DL data after the last one served
    pub fn next_dl_ue(&mut self) -> Option<&mut UeContext> {
        let index = Self::next_matching(&self.ues, self.next_dl, UeContext::has_dl_data)?;
        self.next_dl = (index + 1) % self.ues.len();
        self.ues.get_mut(index)
    }

    /// Next UE waiting for an UL grant after the last one served
    pub fn next_ul_ue(&mut self) -> Option<&mut UeContext> {
        let index = Self::next_matching(&self.ues, self.next_ul, UeContext::has_ul_data)?;
        self.next_ul = (index + 1) % self.ues.len();
        self.ues.get_mut(index)
    }

    fn next_matching(ues: &[UeContext], start: usize, wants: fn(&UeContext) -> bool) -> Option<usize> {
        let n = ues.len();
        (0..n).map(|i| (start + i) % n).find(|i| wants(&ues[*i]))
    }
}

/// Symbols of a slot given to each kind of allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLayout {
    pub dl_ctrl: Option<Range<u8>>,
    pub dl_data: Option<Range<u8>>,
    pub ul_data: Option<Range<u8>>,
    pub ul_ctrl: Option<Range<u8>>,
}

fn non_empty(range: Range<u8>) -> Option<Range<u8>> {
    (range.start < range.end).then_some(range)
}

impl SlotLayout {
    /// DL control first, UL control last. The DL control symbols are kept
    /// free in UL slots too, so a MIB or SIB1 can always be added.
    /// `dl_ctrl + ul_ctrl` must not exceed `symbols`.
    pub fn for_slot(slot_type: SlotType, symbols: u8, dl_ctrl: u8, ul_ctrl: u8) -> Self {
        let ul_ctrl_start = symbols - ul_ctrl;
        let half = (symbols / 2).max(dl_ctrl).min(ul_ctrl_start);

        match slot_type {
            SlotType::Dl => Self {
                dl_ctrl: non_empty(0..dl_ctrl),
                dl_data: non_empty(dl_ctrl..symbols),
                ul_data: None,
                ul_ctrl: None,
            },
            SlotType::S => Self {
                dl_ctrl: non_empty(0..dl_ctrl),
                dl_data: non_empty(dl_ctrl..half),
                ul_data: None,
                ul_ctrl: non_empty(ul_ctrl_start..symbols),
            },
            SlotType::F => Self {
                dl_ctrl: non_empty(0..dl_ctrl),
                dl_data: non_empty(dl_ctrl..half),
                ul_data: non_empty(half..ul_ctrl_start),
                ul_ctrl: non_empty(ul_ctrl_start..symbols),
            },
            SlotType::Ul => Self {
                dl_ctrl: None,
                dl_data: None,
                ul_data: non_empty(dl_ctrl..ul_ctrl_start),
                ul_ctrl: non_empty(ul_ctrl_start..symbols),
            },
        }
    }
}

/// True if no allocation of `existing` touches `symbols`
pub fn symbols_free(existing: Option<&SlotAllocInfo>, symbols: &Range<u8>) -> bool {
    existing.map_or(true, |info| {
        info.var_tti_alloc_info
            .iter()
            .all(|a| a.dci.sym_end() <= symbols.start || a.dci.sym_start >= symbols.end)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cbr(dl: u32, ul: u32) -> TrafficProfile {
        TrafficProfile { dl_packet_bytes: dl, ul_packet_bytes: ul, period_slots: 2 }
    }

    #[test]
    fn test_round_robin_skips_idle_ues() {
        let mut sched = RoundRobinScheduler::new();
        assert!(sched.add_ue(Rnti(1), cbr(100, 0)));
        assert!(sched.add_ue(Rnti(2), cbr(0, 0)));
        assert!(sched.add_ue(Rnti(3), cbr(100, 0)));
        assert!(!sched.add_ue(Rnti(3), cbr(0, 0)));

        sched.generate_traffic(SfnSf::new(0, 0, 0, 0));
        sched.generate_traffic(SfnSf::new(0, 2, 0, 0));
        // odd slots produce nothing with a period of 2
        sched.generate_traffic(SfnSf::new(0, 3, 0, 0));

        let served: Vec<Rnti> = (0..4)
            .filter_map(|_| {
                let ue = sched.next_dl_ue()?;
                ue.dl_queue.pop_front();
                Some(ue.rnti)
            })
            .collect();
        assert_eq!(served, vec![Rnti(1), Rnti(3), Rnti(1), Rnti(3)]);
        assert!(sched.next_dl_ue().is_none());
    }

    #[test]
    fn test_ul_requests_accumulate() {
        let mut sched = RoundRobinScheduler::new();
        sched.add_ue(Rnti(4), cbr(0, 50));
        sched.generate_traffic(SfnSf::new(0, 0, 0, 0));
        sched.generate_traffic(SfnSf::new(0, 2, 0, 0));
        assert_eq!(sched.ue(Rnti(4)).unwrap().ul_pending, 100);
        assert_eq!(sched.next_ul_ue().unwrap().rnti, Rnti(4));

        assert!(sched.remove_ue(Rnti(4)));
        assert!(!sched.remove_ue(Rnti(4)));
        assert!(sched.next_ul_ue().is_none());
    }

    #[test]
    fn test_harq_ids_wrap() {
        let mut ue = UeContext::new(Rnti(1), TrafficProfile::default());
        let ids: Vec<u8> = (0..17).map(|_| ue.next_dl_harq_process()).collect();
        assert_eq!(ids[15], 15);
        assert_eq!(ids[16], 0);
        assert_eq!(ue.next_ul_harq_process(), 0);
    }

    #[test]
    fn test_mcs_follows_cqi() {
        let mut ue = UeContext::new(Rnti(1), TrafficProfile::default());
        assert_eq!(ue.mcs(9), 9);
        ue.cqi = Some(15);
        assert_eq!(ue.mcs(9), MAX_MCS);
        ue.cqi = Some(0);
        assert_eq!(ue.mcs(9), 0);
    }

    #[test]
    fn test_symbols_free() {
        use common::{DciFormat, DciInfo, VarTtiType};

        let mut info = SlotAllocInfo::new(SfnSf::new(0, 0, 0, 0));
        info.push(DciInfo::new(Rnti(1), DciFormat::Ul, VarTtiType::Data, 1, 12, vec![true]));
        assert!(symbols_free(None, &(1..7)));
        assert!(symbols_free(Some(&info), &(0..1)));
        assert!(!symbols_free(Some(&info), &(1..7)));
        assert!(!symbols_free(Some(&info), &(12..14)));
        assert!(symbols_free(Some(&info), &(13..14)));
    }

    #[test]
    fn test_layouts_do_not_overlap() {
        let f = SlotLayout::for_slot(SlotType::F, 14, 1, 1);
        assert_eq!(f.dl_ctrl, Some(0..1));
        assert_eq!(f.dl_data, Some(1..7));
        assert_eq!(f.ul_data, Some(7..13));
        assert_eq!(f.ul_ctrl, Some(13..14));

        let ul = SlotLayout::for_slot(SlotType::Ul, 14, 1, 1);
        assert_eq!(ul.dl_ctrl, None);
        assert_eq!(ul.ul_data, Some(1..13));

        let dl = SlotLayout::for_slot(SlotType::Dl, 14, 2, 1);
        assert_eq!(dl.dl_data, Some(2..14));
        assert_eq!(dl.ul_ctrl, None);

        let s = SlotLayout::for_slot(SlotType::S, 12, 1, 1);
        assert_eq!(s.dl_data, Some(1..6));
        assert_eq!(s.ul_data, None);
        assert_eq!(s.ul_ctrl, Some(11..12));

        let tiny = SlotLayout::for_slot(SlotType::F, 2, 1, 1);
        assert_eq!(tiny.dl_data, None);
        assert_eq!(tiny.ul_data, None);
        assert_eq!(tiny.ul_ctrl, Some(1..2));
    }
}
