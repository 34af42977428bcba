//! Medium Access Control (MAC) Layer Implementation
//!
//! A reference gNB MAC for driving the PHY: round-robin DL and UL data, DL
//! control at the start and UL control at the end of every slot, and Msg3
//! grants for received RACH preambles.

pub mod scheduler;
pub mod sib1;

use crate::LayerError;
use bytes::Bytes;
use common::{DciFormat, DciInfo, RarInfo, Rnti, SfnSf, SlotAllocInfo, SlotType, VarTtiType};
use interfaces::message_types::{ControlMessage, ControlPayload, UlHarqInfo};
use interfaces::sap::{GnbPhySapUser, PhySapProvider};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub use scheduler::{symbols_free, RoundRobinScheduler, SlotLayout, TrafficProfile, UeContext};
pub use sib1::{PlmnId, Sib1Config};

/// MAC layer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacConfig {
    /// Symbols of the DL control region
    #[serde(default = "default_ctrl_symbols")]
    pub dl_ctrl_symbols: u8,
    /// Symbols of the UL control region
    #[serde(default = "default_ctrl_symbols")]
    pub ul_ctrl_symbols: u8,
    #[serde(default = "default_rb_per_rbg")]
    pub rb_per_rbg: u32,
    /// MCS used until a UE reports CQI
    #[serde(default = "default_mcs")]
    pub default_mcs: u8,
    /// UL bytes granted for a scheduling request
    #[serde(default = "default_sr_grant_bytes")]
    pub sr_grant_bytes: u32,
    /// Msg3 grant size
    #[serde(default = "default_msg3_bytes")]
    pub msg3_bytes: u32,
    /// First temporary C-RNTI handed out in RARs
    #[serde(default = "default_first_temp_rnti")]
    pub first_temp_rnti: u16,
}

fn default_ctrl_symbols() -> u8 {
    1
}

fn default_rb_per_rbg() -> u32 {
    1
}

fn default_mcs() -> u8 {
    9
}

fn default_sr_grant_bytes() -> u32 {
    256
}

fn default_msg3_bytes() -> u32 {
    56
}

fn default_first_temp_rnti() -> u16 {
    1000
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            dl_ctrl_symbols: default_ctrl_symbols(),
            ul_ctrl_symbols: default_ctrl_symbols(),
            rb_per_rbg: default_rb_per_rbg(),
            default_mcs: default_mcs(),
            sr_grant_bytes: default_sr_grant_bytes(),
            msg3_bytes: default_msg3_bytes(),
            first_temp_rnti: default_first_temp_rnti(),
        }
    }
}

/// What the MAC did so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MacStats {
    pub dl_data_allocations: u64,
    pub ul_data_allocations: u64,
    pub dl_bytes_scheduled: u64,
    pub ul_bytes_granted: u64,
    pub ul_bytes_received: u64,
    pub dl_harq_ack: u64,
    pub dl_harq_nack: u64,
    pub ul_harq_failures: u64,
    pub cqi_reports: u64,
    pub rach_preambles: u64,
    pub msg3_scheduled: u64,
}

/// Shared view on the stats of a MAC owned by the PHY
#[derive(Debug, Clone, Default)]
pub struct MacStatsHandle(Rc<RefCell<MacStats>>);

impl MacStatsHandle {
    pub fn snapshot(&self) -> MacStats {
        self.0.borrow().clone()
    }

    fn update(&self, f: impl FnOnce(&mut MacStats)) {
        f(&mut self.0.borrow_mut());
    }
}

/// Round-robin gNB MAC
pub struct SimpleGnbMac {
    config: MacConfig,
    symbols_per_slot: u8,
    /// Full-bandwidth RBG mask
    rbg_mask: Vec<bool>,
    scheduler: RoundRobinScheduler,
    current_sfn: Option<SfnSf>,
    pending_rach: VecDeque<u32>,
    next_temp_rnti: u16,
    stats: MacStatsHandle,
}

impl SimpleGnbMac {
    pub fn new(config: MacConfig, rb_num: u32, symbols_per_slot: u8) -> Result<Self, LayerError> {
        if config.rb_per_rbg == 0 {
            return Err(LayerError::InvalidConfiguration("RBs per RBG must be positive".into()));
        }
        if config.dl_ctrl_symbols as u32 + config.ul_ctrl_symbols as u32 > symbols_per_slot as u32 {
            return Err(LayerError::InvalidConfiguration(format!(
                "{} DL and {} UL control symbols do not fit a {} symbol slot",
                config.dl_ctrl_symbols, config.ul_ctrl_symbols, symbols_per_slot
            )));
        }
        let num_rbg = rb_num.div_ceil(config.rb_per_rbg) as usize;

        info!(
            "MAC: {} RBGs of {} RBs, {} DL / {} UL control symbols",
            num_rbg, config.rb_per_rbg, config.dl_ctrl_symbols, config.ul_ctrl_symbols
        );
        Ok(Self {
            symbols_per_slot,
            rbg_mask: vec![true; num_rbg],
            scheduler: RoundRobinScheduler::new(),
            current_sfn: None,
            pending_rach: VecDeque::new(),
            next_temp_rnti: config.first_temp_rnti,
            stats: MacStatsHandle::default(),
            config,
        })
    }

    pub fn stats(&self) -> MacStatsHandle {
        self.stats.clone()
    }

    pub fn add_ue(&mut self, rnti: Rnti, traffic: TrafficProfile) -> bool {
        self.scheduler.add_ue(rnti, traffic)
    }

    pub fn remove_ue(&mut self, rnti: Rnti) -> bool {
        self.scheduler.remove_ue(rnti)
    }

    pub fn scheduler(&self) -> &RoundRobinScheduler {
        &self.scheduler
    }

    /// Queue a DL packet for `rnti`
    pub fn enqueue_dl(&mut self, rnti: Rnti, data: Bytes) -> Result<(), LayerError> {
        let ue = self
            .scheduler
            .ue_mut(rnti)
            .ok_or(LayerError::UeNotAttached(rnti))?;
        ue.dl_queue.push_back(data);
        Ok(())
    }

    fn layout(&self, slot_type: SlotType) -> SlotLayout {
        SlotLayout::for_slot(
            slot_type,
            self.symbols_per_slot,
            self.config.dl_ctrl_symbols,
            self.config.ul_ctrl_symbols,
        )
    }

    fn ctrl_dci(&self, format: DciFormat, symbols: std::ops::Range<u8>) -> DciInfo {
        DciInfo::new(
            Rnti::NONE,
            format,
            VarTtiType::Ctrl,
            symbols.start,
            symbols.end - symbols.start,
            self.rbg_mask.clone(),
        )
    }

    fn next_temp_rnti(&mut self) -> Rnti {
        let rnti = Rnti(self.next_temp_rnti);
        self.next_temp_rnti = self.next_temp_rnti.wrapping_add(1).max(self.config.first_temp_rnti);
        rnti
    }
}

impl GnbPhySapUser for SimpleGnbMac {
    fn set_current_sfn(&mut self, sfn: SfnSf) {
        self.current_sfn = Some(sfn);
        self.scheduler.generate_traffic(sfn);
    }

    fn slot_dl_indication(&mut self, sfn: SfnSf, slot_type: SlotType, phy: &mut dyn PhySapProvider) {
        // a slot moved here by a channel access denial keeps its allocations
        let existing = phy.slot_alloc_info(sfn);
        if existing.is_some_and(|s| s.contains_dl_ctrl_allocation()) {
            debug!("DL of {} already scheduled", sfn);
            return;
        }
        let layout = self.layout(slot_type);
        let Some(ctrl) = layout.dl_ctrl.filter(|r| symbols_free(existing, r)) else {
            trace!("No DL in {} slot {}", slot_type, sfn);
            return;
        };
        let data_symbols = layout.dl_data.filter(|r| symbols_free(existing, r));

        let mut info = SlotAllocInfo::new(sfn);
        info.push(self.ctrl_dci(DciFormat::Dl, ctrl));

        let default_mcs = self.config.default_mcs;
        let mask = self.rbg_mask.clone();
        if let Some(symbols) = data_symbols {
            if let Some(ue) = self.scheduler.next_dl_ue() {
                if let Some(pdu) = ue.dl_queue.pop_front() {
                    let mut dci = DciInfo::new(
                        ue.rnti,
                        DciFormat::Dl,
                        VarTtiType::Data,
                        symbols.start,
                        symbols.end - symbols.start,
                        mask,
                    );
                    dci.mcs = ue.mcs(default_mcs);
                    dci.tb_size = pdu.len() as u32;
                    dci.harq_process = ue.next_dl_harq_process();
                    debug!("DL {} for {}: {} bytes", dci, sfn, pdu.len());

                    let bytes = pdu.len() as u64;
                    phy.set_mac_pdu(pdu, sfn, dci.sym_start, dci.rnti);
                    info.push(dci);
                    self.stats.update(|s| {
                        s.dl_data_allocations += 1;
                        s.dl_bytes_scheduled += bytes;
                    });
                }
            }
        }

        phy.set_slot_alloc_info(info);
    }

    fn slot_ul_indication(&mut self, sfn: SfnSf, slot_type: SlotType, phy: &mut dyn PhySapProvider) {
        let existing = phy.slot_alloc_info(sfn);
        if existing.is_some_and(|s| s.contains_ul_ctrl_allocation()) {
            debug!("UL of {} already scheduled", sfn);
            return;
        }
        let layout = self.layout(slot_type);
        let Some(ctrl) = layout.ul_ctrl.filter(|r| symbols_free(existing, r)) else {
            trace!("No UL in {} slot {}", slot_type, sfn);
            return;
        };
        let data_symbols = layout.ul_data.filter(|r| symbols_free(existing, r));

        let mut info = SlotAllocInfo::new(sfn);
        if let Some(symbols) = data_symbols {
            let (start, len) = (symbols.start, symbols.end - symbols.start);
            if let Some(rap_id) = self.pending_rach.pop_front() {
                let rnti = self.next_temp_rnti();
                let mut dci = DciInfo::new(rnti, DciFormat::Ul, VarTtiType::Msg3, start, len, self.rbg_mask.clone());
                dci.mcs = self.config.default_mcs;
                dci.tb_size = self.config.msg3_bytes;
                let dci = Arc::new(dci);
                info!("Msg3 for preamble {} in {} with temporary RNTI {}", rap_id, sfn, rnti);

                info.push((*dci).clone());
                info.build_rar_list.push(RarInfo {
                    ra_preamble_id: rap_id as u8,
                    ul_msg3_dci: dci,
                    k2_delay: 0,
                });
                self.stats.update(|s| s.msg3_scheduled += 1);
            } else {
                let default_mcs = self.config.default_mcs;
                let mask = self.rbg_mask.clone();
                if let Some(ue) = self.scheduler.next_ul_ue() {
                    let granted = ue.ul_pending;
                    ue.ul_pending = 0;
                    let mut dci = DciInfo::new(ue.rnti, DciFormat::Ul, VarTtiType::Data, start, len, mask);
                    dci.mcs = ue.mcs(default_mcs);
                    dci.tb_size = granted;
                    dci.harq_process = ue.next_ul_harq_process();
                    debug!("UL {} for {}: {} bytes", dci, sfn, granted);

                    info.push(dci);
                    self.stats.update(|s| {
                        s.ul_data_allocations += 1;
                        s.ul_bytes_granted += granted as u64;
                    });
                }
            }
        }
        info.push(self.ctrl_dci(DciFormat::Ul, ctrl));

        phy.set_slot_alloc_info(info);
    }

    fn dl_ctrl_dci(&self) -> DciInfo {
        self.ctrl_dci(DciFormat::Dl, 0..self.config.dl_ctrl_symbols)
    }

    fn ul_ctrl_dci(&self) -> DciInfo {
        let start = self.symbols_per_slot - self.config.ul_ctrl_symbols;
        self.ctrl_dci(DciFormat::Ul, start..self.symbols_per_slot)
    }

    fn dl_ctrl_symbols(&self) -> u8 {
        self.config.dl_ctrl_symbols
    }

    fn num_rb_per_rbg(&self) -> u32 {
        self.config.rb_per_rbg
    }

    fn receive_control_message(&mut self, msg: ControlMessage) {
        match msg.payload {
            ControlPayload::DlCqi(cqi) => {
                if let Some(ue) = self.scheduler.ue_mut(cqi.rnti) {
                    ue.cqi = Some(cqi.wideband_cqi);
                }
                self.stats.update(|s| s.cqi_reports += 1);
            }
            ControlPayload::DlHarq(harq) => {
                debug!("DL HARQ {} for RNTI {} process {}", harq.ack, harq.rnti, harq.harq_process);
                self.stats.update(|s| {
                    if harq.ack {
                        s.dl_harq_ack += 1;
                    } else {
                        s.dl_harq_nack += 1;
                    }
                });
            }
            ControlPayload::Bsr { rnti, buffer_bytes } => match self.scheduler.ue_mut(rnti) {
                Some(ue) => ue.ul_pending = buffer_bytes,
                None => warn!("BSR from unknown RNTI {}", rnti),
            },
            ControlPayload::Sr { rnti } => match self.scheduler.ue_mut(rnti) {
                Some(ue) => ue.ul_pending = ue.ul_pending.max(self.config.sr_grant_bytes),
                None => warn!("SR from unknown RNTI {}", rnti),
            },
            other => trace!("MAC ignores {:?}", other),
        }
    }

    fn receive_rach_preamble(&mut self, rap_id: u32) {
        debug!("RACH preamble {} received, current slot {:?}", rap_id, self.current_sfn);
        self.pending_rach.push_back(rap_id);
        self.stats.update(|s| s.rach_preambles += 1);
    }

    fn ul_harq_feedback(&mut self, info: UlHarqInfo) {
        if !info.received_ok {
            debug!("UL HARQ failure for RNTI {} process {}", info.rnti, info.harq_process);
            self.stats.update(|s| s.ul_harq_failures += 1);
        }
    }

    fn receive_phy_pdu(&mut self, pdu: Bytes) {
        let bytes = pdu.len() as u64;
        self.stats.update(|s| s.ul_bytes_received += bytes);
    }
}
