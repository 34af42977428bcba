//! gNB PHY slot engine
//!
//! Runs every slot of one bandwidth part: pulls the allocation of the slot
//! from the store, asks the MAC for future slots following the DCI maps,
//! obtains the channel, and schedules one event per symbol-level allocation.
//! All work happens in event handlers; nothing blocks.

use super::channel_access::{ChannelAccessCoordinator, ChannelStatus, GrantDecision};
use super::csi_rs::{CsiRsModel, CsiRsOffsets, CSI_RS_SPACING};
use super::ctrl_queue::ControlMessageQueue;
use super::frame_structure::FrameStructure;
use super::rbg::{allocation_statistics, RbgAllocator};
use super::slot_alloc_store::SlotAllocationStore;
use super::slot_timing::DciMaps;
use super::{PhyConfig, PowerAllocationType};
use crate::sim::{EventHandler, EventQueue};
use crate::LayerError;
use bytes::Bytes;
use common::{
    BwpId, DciFormat, DciInfo, Imsi, PacketBurst, Rnti, SfnSf, SlotAllocInfo, TddPattern,
    VarTtiAllocInfo, VarTtiType,
};
use interfaces::message_types::{
    ControlMessage, ControlPayload, ExpectedTb, MessageType, Mib, Rar, Sib1, UlHarqInfo,
};
use interfaces::sap::{
    AccessOutcome, AccessResponse, ChannelAccessManager, FhControlMethod, FronthaulControl,
    GnbPhySapUser, PhySapProvider, SpectrumPhy,
};
use interfaces::trace::{CtrlMsgTrace, PhyTraceSink, RbStats, SlotStats, TraceRecord};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Fixed seed of the fronthaul dropping order: every slot is shuffled alike
const FH_SHUFFLE_SEED: u64 = 0;

/// Guard between the end of a transmission and the next symbol boundary
const TX_GUARD: Duration = Duration::from_nanos(1);

/// Events of the PHY
#[derive(Debug, Clone)]
pub enum PhyEvent {
    StartSlot(SfnSf),
    EndSlot,
    StartVarTti(Arc<DciInfo>),
    EndVarTti(Arc<DciInfo>),
    /// Receive window of an UL control allocation
    UlCtrl(Arc<DciInfo>),
    UlSrs(Arc<DciInfo>),
    SendDataChannels {
        burst: PacketBurst,
        duration: Duration,
        dci: Arc<DciInfo>,
    },
    TransmitCsiRs(Rnti),
    ChannelAccessGranted(Duration),
    ChannelAccessLost,
    /// Decoded uplink PDU ready for the MAC
    DeliverPhyPdu(Bytes),
}

/// Running totals, for the end-of-run summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhyCounters {
    pub slots: u64,
    pub deferred_slots: u64,
    pub access_requests: u64,
    pub dl_ctrl_tx: u64,
    pub dl_data_tx: u64,
    pub ul_ctrl_rx: u64,
    pub ul_tb_expected: u64,
    pub srs_expected: u64,
    pub csi_rs_tx: u64,
    pub fh_dropped: u64,
}

/// PHY services handed to the MAC, borrowing the parts of the PHY it may touch
pub struct PhySapHandle<'a> {
    store: &'a mut SlotAllocationStore,
    ctrl_queue: &'a mut ControlMessageQueue,
    frame: &'a FrameStructure,
    bwp_id: BwpId,
    /// First fatal error raised through the handle; the PHY returns it from
    /// its next event
    error: &'a mut Option<LayerError>,
}

impl PhySapProvider for PhySapHandle<'_> {
    fn set_slot_alloc_info(&mut self, info: SlotAllocInfo) {
        if info.sfn.numerology() != self.frame.numerology() {
            error!(
                "Allocation for {} has numerology {} on a numerology {} PHY",
                info.sfn,
                info.sfn.numerology(),
                self.frame.numerology()
            );
            self.error.get_or_insert(LayerError::NumerologyMismatch {
                expected: self.frame.numerology(),
                found: info.sfn.numerology(),
            });
            return;
        }
        self.store.push_back(info);
    }

    fn slot_alloc_info(&self, sfn: SfnSf) -> Option<&SlotAllocInfo> {
        self.store.peek(&sfn).ok()
    }

    fn enqueue_ctrl_message(&mut self, msg: ControlMessage) {
        self.ctrl_queue.enqueue(msg);
    }

    fn set_mac_pdu(&mut self, pdu: Bytes, sfn: SfnSf, sym_start: u8, rnti: Rnti) {
        self.store.set_mac_pdu(pdu, sfn, sym_start, rnti);
    }

    fn rb_num(&self) -> u32 {
        self.frame.rb_num()
    }

    fn symbols_per_slot(&self) -> u32 {
        self.frame.symbols_per_slot() as u32
    }

    fn slot_period(&self) -> Duration {
        self.frame.slot_period()
    }

    fn bwp_id(&self) -> BwpId {
        self.bwp_id
    }
}

fn pattern_position(pattern: &TddPattern, sfn: &SfnSf) -> usize {
    (sfn.normalize() % pattern.len() as u64) as usize
}

/// The gNB PHY of one bandwidth part
pub struct GnbPhy {
    config: PhyConfig,
    frame: FrameStructure,
    maps: DciMaps,

    store: SlotAllocationStore,
    ctrl_queue: ControlMessageQueue,
    channel: ChannelAccessCoordinator,
    rbg: RbgAllocator,
    csi_rs: CsiRsOffsets,

    /// Registered UEs in registration order
    ue_devices: Vec<(Imsi, Rnti)>,
    attached_rntis: BTreeSet<Rnti>,
    sib1: Sib1,

    current_slot: SfnSf,
    last_slot_start: Duration,
    curr_slot_alloc: SlotAllocInfo,
    curr_sym_start: u8,
    /// Control messages of the current slot, sent in the DL CTRL var-TTI
    ctrl_msgs: Vec<ControlMessage>,
    last_bf_change: Option<Duration>,
    counters: PhyCounters,
    sap_error: Option<LayerError>,

    mac: Box<dyn GnbPhySapUser>,
    spectrum: Box<dyn SpectrumPhy>,
    cam: Box<dyn ChannelAccessManager>,
    fh: Option<Box<dyn FronthaulControl>>,
    trace_sink: Box<dyn PhyTraceSink>,
}

impl GnbPhy {
    pub fn new(
        config: PhyConfig,
        mac: Box<dyn GnbPhySapUser>,
        spectrum: Box<dyn SpectrumPhy>,
        cam: Box<dyn ChannelAccessManager>,
        trace_sink: Box<dyn PhyTraceSink>,
    ) -> Result<Self, LayerError> {
        config.validate()?;
        let frame = config.frame_structure()?;
        let delays = config.delays();
        let maps = DciMaps::from_pattern(&config.pattern, &delays)?;
        let rbg = RbgAllocator::new(mac.num_rb_per_rbg());
        let current_slot = SfnSf::new(0, 0, 0, config.numerology);

        info!(
            "Created PHY for BWP {:?}: numerology {}, {} RBs, {:?} pattern {}",
            config.bwp_id,
            config.numerology,
            frame.rb_num(),
            config.pattern.duplex_mode(),
            config.pattern
        );

        Ok(Self {
            frame,
            maps,
            store: SlotAllocationStore::new(),
            ctrl_queue: ControlMessageQueue::new(delays.l1l2_ctrl_latency),
            channel: ChannelAccessCoordinator::new(),
            rbg,
            csi_rs: CsiRsOffsets::new(),
            ue_devices: Vec::new(),
            attached_rntis: BTreeSet::new(),
            sib1: Sib1::default(),
            current_slot,
            last_slot_start: Duration::ZERO,
            curr_slot_alloc: SlotAllocInfo::new(current_slot),
            curr_sym_start: 0,
            ctrl_msgs: Vec::new(),
            last_bf_change: None,
            counters: PhyCounters::default(),
            sap_error: None,
            mac,
            spectrum,
            cam,
            fh: None,
            trace_sink,
            config,
        })
    }

    /// Attach a fronthaul controller
    pub fn with_fronthaul(mut self, fh: Box<dyn FronthaulControl>) -> Self {
        self.fh = Some(fh);
        self
    }

    pub fn config(&self) -> &PhyConfig {
        &self.config
    }

    pub fn frame(&self) -> &FrameStructure {
        &self.frame
    }

    pub fn maps(&self) -> &DciMaps {
        &self.maps
    }

    pub fn pattern(&self) -> &TddPattern {
        &self.config.pattern
    }

    pub fn current_slot(&self) -> SfnSf {
        self.current_slot
    }

    pub fn channel_status(&self) -> ChannelStatus {
        self.channel.status()
    }

    pub fn store(&self) -> &SlotAllocationStore {
        &self.store
    }

    pub fn counters(&self) -> &PhyCounters {
        &self.counters
    }

    /// Services for a MAC running outside a slot indication
    pub fn sap_provider(&mut self) -> PhySapHandle<'_> {
        PhySapHandle {
            store: &mut self.store,
            ctrl_queue: &mut self.ctrl_queue,
            frame: &self.frame,
            bwp_id: self.config.bwp_id,
            error: &mut self.sap_error,
        }
    }

    /// Replace the pattern and rebuild every timing map
    pub fn set_tdd_pattern(&mut self, pattern: TddPattern) -> Result<(), LayerError> {
        info!("Set pattern: {}", pattern);
        let maps = DciMaps::from_pattern(&pattern, &self.config.delays())?;
        self.config.pattern = pattern;
        self.maps = maps;
        Ok(())
    }

    pub fn set_pattern(&mut self, pattern: &str) -> Result<(), LayerError> {
        self.set_tdd_pattern(pattern.parse()?)
    }

    pub fn set_n0_delay(&mut self, delay: u32) -> Result<(), LayerError> {
        self.update_delays(|config| config.n0 = delay)
    }

    pub fn set_n1_delay(&mut self, delay: u32) -> Result<(), LayerError> {
        self.update_delays(|config| config.n1 = delay)
    }

    pub fn set_n2_delay(&mut self, delay: u32) -> Result<(), LayerError> {
        self.update_delays(|config| config.n2 = delay)
    }

    fn update_delays(&mut self, update: impl FnOnce(&mut PhyConfig)) -> Result<(), LayerError> {
        let mut config = self.config.clone();
        update(&mut config);
        let delays = config.delays();
        delays.validate()?;
        self.maps = DciMaps::from_pattern(&config.pattern, &delays)?;
        self.config = config;
        debug!("Delays now {:?}", delays);
        Ok(())
    }

    pub fn set_sib1(&mut self, sib1: Sib1) {
        self.sib1 = sib1;
    }

    /// Register a UE for beamforming and CSI-RS. Returns false if the IMSI is
    /// already registered.
    pub fn register_ue(&mut self, imsi: Imsi, rnti: Rnti) -> Result<bool, LayerError> {
        if self.ue_devices.iter().any(|(known, _)| *known == imsi) {
            error!("UE with IMSI {} already registered", imsi.0);
            return Ok(false);
        }
        self.ue_devices.push((imsi, rnti));

        if self.config.csi_rs.enabled && self.config.pattern.has_dl_slot() {
            self.csi_rs
                .assign(&self.config.pattern, self.config.csi_rs.periodicity, rnti)?;
        }
        info!("Registered UE with IMSI {} as RNTI {}", imsi.0, rnti);
        Ok(true)
    }

    pub fn add_ue(&mut self, rnti: Rnti) {
        if self.attached_rntis.insert(rnti) {
            debug!("RNTI {} attached", rnti);
        }
    }

    pub fn remove_ue(&mut self, rnti: Rnti) -> Result<(), LayerError> {
        if !self.attached_rntis.remove(&rnti) {
            return Err(LayerError::UeNotAttached(rnti));
        }
        debug!("RNTI {} removed", rnti);
        Ok(())
    }

    fn is_registered(&self, rnti: Rnti) -> bool {
        self.ue_devices.iter().any(|(_, known)| *known == rnti)
    }

    /// Reset the control pipeline and schedule the first slot
    pub fn start_event_loop(
        &mut self,
        queue: &mut EventQueue<PhyEvent>,
        frame: u32,
        subframe: u8,
        slot: u8,
    ) {
        info!(
            "PHY starting: N0 {} N1 {} N2 {} TB decode latency {:?} numerology {} symbols per slot {} pattern {} bandwidth {} Hz, {} RBs",
            self.config.n0,
            self.config.n1,
            self.config.n2,
            self.config.tb_decode_latency(),
            self.config.numerology,
            self.frame.symbols_per_slot(),
            self.config.pattern,
            self.frame.channel_bandwidth_hz(),
            self.frame.rb_num()
        );
        self.ctrl_queue.initialize(self.config.delays().l1l2_ctrl_latency);
        let start = SfnSf::new(frame, subframe, slot, self.config.numerology);
        queue.schedule(Duration::ZERO, PhyEvent::StartSlot(start));
    }

    /// Flush the trace sink
    pub fn finish(&mut self) -> Result<(), LayerError> {
        self.trace_sink.flush()?;
        Ok(())
    }

    fn start_slot(&mut self, queue: &mut EventQueue<PhyEvent>, sfn: SfnSf) -> Result<(), LayerError> {
        debug_assert_ne!(self.channel.status(), ChannelStatus::ToLose);
        if sfn.numerology() != self.frame.numerology() {
            return Err(LayerError::NumerologyMismatch {
                expected: self.frame.numerology(),
                found: sfn.numerology(),
            });
        }

        self.current_slot = sfn;
        self.last_slot_start = queue.now();
        self.counters.slots += 1;
        queue.schedule(self.frame.slot_period(), PhyEvent::EndSlot);

        self.curr_slot_alloc = if self.store.exists(&sfn) {
            let mut alloc = self.store.retrieve(&sfn)?;
            alloc.sort_by_sym_start();
            alloc
        } else {
            warn!("No allocation for slot {}, using an empty one", sfn);
            SlotAllocInfo::new(sfn)
        };

        if self.config.primary {
            self.queue_broadcast();
        }

        if self.channel.is_granted() {
            trace!("Channel granted");
            self.call_mac_for_slot_indication(sfn)?;
            return self.do_start_slot(queue);
        }

        let ul_sfn = sfn.plus(self.config.n2);
        let has_ul_dci = self.config.n2 > 0
            && self.store.peek(&ul_sfn).is_ok_and(|ul| {
                ul.contains_data_allocation()
                    || ul.contains_ul_ctrl_allocation()
                    || ul.contains_ul_msg3_allocation()
            });

        // A DL CTRL asks for the channel even with no message queued yet
        let needs_channel = self.curr_slot_alloc.contains_data_allocation()
            || self.curr_slot_alloc.contains_dl_ctrl_allocation()
            || self.curr_slot_alloc.contains_ul_msg3_allocation()
            || has_ul_dci;

        if needs_channel {
            if self.channel.status() == ChannelStatus::None {
                info!("Channel not granted, request the channel");
                if self.request_channel_access(queue) {
                    debug!("Channel granted at once, starting the slot");
                    self.call_mac_for_slot_indication(sfn)?;
                    return self.do_start_slot(queue);
                }
            }

            // The MAC is not called: the renumbered slots take the place of
            // the ones it would have generated
            let new_sfn = sfn.plus(1);
            if self.curr_slot_alloc.contains_data_allocation() {
                info!("Queueing allocation in front for {}: slot has data", new_sfn);
            } else {
                info!("Queueing allocation in front for {}: slot has control", new_sfn);
            }
            self.counters.deferred_slots += 1;
            self.store.push_front(new_sfn, self.curr_slot_alloc.clone());
        } else {
            debug!("Empty slot {}, asking the MAC for future slots", sfn);
            self.call_mac_for_slot_indication(sfn)?;
        }

        // Receiving does not need the channel
        let symbol_period = self.frame.symbol_period();
        for alloc in &self.curr_slot_alloc.var_tti_alloc_info {
            let dci = &alloc.dci;
            if dci.format != DciFormat::Ul {
                continue;
            }
            let start = symbol_period * dci.sym_start as u32;
            match dci.var_tti_type {
                VarTtiType::Ctrl => {
                    trace!("Schedule UL CTRL at {:?}", start);
                    queue.schedule(start, PhyEvent::UlCtrl(dci.clone()));
                }
                VarTtiType::Srs => {
                    trace!("Schedule UL SRS at {:?}", start);
                    queue.schedule(start, PhyEvent::UlSrs(dci.clone()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Mark the request and ask the manager. True if the channel is held once
    /// the manager returns.
    fn request_channel_access(&mut self, queue: &mut EventQueue<PhyEvent>) -> bool {
        self.channel.mark_requested();
        self.counters.access_requests += 1;

        match self.cam.request_access() {
            AccessResponse::Immediate(AccessOutcome::Granted(time)) => {
                self.channel_access_granted(queue, time)
            }
            AccessResponse::Immediate(AccessOutcome::Denied) => self.channel.on_lost(),
            AccessResponse::Deferred { after, outcome } => {
                let event = match outcome {
                    AccessOutcome::Granted(time) => PhyEvent::ChannelAccessGranted(time),
                    AccessOutcome::Denied => PhyEvent::ChannelAccessLost,
                };
                queue.schedule(after, event);
            }
        }
        self.channel.is_granted()
    }

    fn channel_access_granted(&mut self, queue: &mut EventQueue<PhyEvent>, time: Duration) {
        let slot_period = self.frame.slot_period();
        let to_next_slot = (self.last_slot_start + slot_period).saturating_sub(queue.now());
        if let GrantDecision::Granted { lost_after, .. } =
            self.channel.on_granted(time, slot_period, to_next_slot)
        {
            let id = queue.schedule(lost_after, PhyEvent::ChannelAccessLost);
            self.channel.set_lost_timer(id);
        }
    }

    /// MIB at the start of every frame, SIB1 at the start of the second half
    fn queue_broadcast(&mut self) {
        if self.current_slot.slot() != 0 {
            return;
        }
        let payload = match self.current_slot.subframe() {
            0 => ControlPayload::Mib(Mib {
                numerology: self.config.numerology,
                dl_bandwidth: self.frame.mib_dl_bandwidth(),
                system_frame_number: 1,
            }),
            5 => ControlPayload::Sib1(self.sib1.clone()),
            _ => return,
        };
        self.ctrl_queue
            .enqueue_now(ControlMessage::new(self.config.bwp_id, payload));

        if !self.curr_slot_alloc.contains_dl_ctrl_allocation() {
            let dci = self.mac.dl_ctrl_dci();
            self.curr_slot_alloc
                .var_tti_alloc_info
                .push_front(VarTtiAllocInfo::new(dci));
            self.curr_slot_alloc.num_sym_alloc += self.mac.dl_ctrl_symbols() as u32;
        }
    }

    fn call_mac_for_slot_indication(&mut self, current: SfnSf) -> Result<(), LayerError> {
        self.mac.set_current_sfn(current);

        let pattern = &self.config.pattern;
        let pos = pattern_position(pattern, &current);
        debug!("Slot {} at position {} of type {}", current, pos, pattern.get(pos));

        let mut sap = PhySapHandle {
            store: &mut self.store,
            ctrl_queue: &mut self.ctrl_queue,
            frame: &self.frame,
            bwp_id: self.config.bwp_id,
            error: &mut self.sap_error,
        };

        for k2 in self.maps.generate_ul.get(&pos).into_iter().flatten() {
            let target = current.plus(*k2);
            let slot_type = pattern.get(pattern_position(pattern, &target));
            debug!("In slot {} generate UL for {} of type {}", current, target, slot_type);
            self.mac.slot_ul_indication(target, slot_type, &mut sap);
        }

        for k0 in self.maps.generate_dl.get(&pos).into_iter().flatten() {
            let target = current.plus(*k0);
            let slot_type = pattern.get(pattern_position(pattern, &target));
            debug!("In slot {} generate DL for {} of type {}", current, target, slot_type);
            self.mac.slot_dl_indication(target, slot_type, &mut sap);
        }

        match self.sap_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn do_start_slot(&mut self, queue: &mut EventQueue<PhyEvent>) -> Result<(), LayerError> {
        if !self.ctrl_msgs.is_empty() {
            warn!("Dropping {} control messages left from an earlier slot", self.ctrl_msgs.len());
            self.ctrl_msgs.clear();
        }

        debug!(
            "Start slot {} of type {}",
            self.current_slot,
            self.config
                .pattern
                .get(pattern_position(&self.config.pattern, &self.current_slot))
        );

        self.generate_allocation_statistics()?;

        if self.curr_slot_alloc.is_empty() {
            return Ok(());
        }
        debug!("Allocations of the current {}", self.curr_slot_alloc);

        self.check_or_release_channel();
        self.retrieve_prepare_encode_ctrl_msgs()?;
        self.prepare_rbg_allocation_map()?;

        if self
            .fh
            .as_ref()
            .is_some_and(|fh| fh.control_method() == FhControlMethod::Dropping)
        {
            self.handle_fh_dropping();
        }

        self.fill_the_event(queue);
        Ok(())
    }

    fn generate_allocation_statistics(&mut self) -> Result<(), LayerError> {
        let stats = allocation_statistics(&self.curr_slot_alloc, self.rbg.rb_per_rbg())?;
        let symbols = self.frame.symbols_per_slot() as u32;
        let slot_stats = |used_reg, used_sym, available_sym| SlotStats {
            sfn: self.curr_slot_alloc.sfn,
            active_ues: stats.active_ues,
            used_reg,
            used_sym,
            available_rb: self.frame.rb_num(),
            available_sym,
            bwp_id: self.config.bwp_id,
            cell_id: self.config.cell_id,
        };
        let data = slot_stats(stats.data_reg, stats.data_sym, symbols.saturating_sub(stats.ctrl_sym));
        let ctrl = slot_stats(stats.ctrl_reg, stats.ctrl_sym, symbols.saturating_sub(stats.data_sym));

        self.trace_sink.record(TraceRecord::SlotData(data))?;
        self.trace_sink.record(TraceRecord::SlotCtrl(ctrl))?;
        Ok(())
    }

    fn check_or_release_channel(&mut self) {
        // the scheduler allocates contiguous symbols
        let last_dl_symbol = self
            .curr_slot_alloc
            .var_tti_alloc_info
            .iter()
            .filter(|a| a.dci.var_tti_type == VarTtiType::Data && a.dci.format == DciFormat::Dl)
            .map(|a| a.dci.sym_end())
            .max()
            .unwrap_or(0);
        let last_data_time = self.frame.symbol_period() * last_dl_symbol as u32;
        self.channel
            .check_or_release(self.frame.slot_period(), last_data_time);
    }

    fn retrieve_prepare_encode_ctrl_msgs(&mut self) -> Result<(), LayerError> {
        let mut msgs = self.ctrl_queue.pop_current();
        msgs.extend(self.retrieve_msgs_from_dcis()?);
        msgs.sort_by_key(ControlMessage::message_type);
        trace!("{} control messages for slot {}", msgs.len(), self.current_slot);
        self.ctrl_msgs = msgs;
        Ok(())
    }

    /// DCIs and RARs due in the current slot, for this slot or later ones
    fn retrieve_msgs_from_dcis(&self) -> Result<Vec<ControlMessage>, LayerError> {
        let current = self.current_slot;
        let pos = pattern_position(&self.config.pattern, &current);
        let k1_delay = self.maps.dl_harq_fb_position.get(&pos).copied().unwrap_or(0);

        let mut msgs = Vec::new();
        for (format, to_send) in [
            (DciFormat::Dl, &self.maps.to_send_dl),
            (DciFormat::Ul, &self.maps.to_send_ul),
        ] {
            for k in to_send.get(&pos).into_iter().flatten() {
                let target = current.plus(*k);
                let alloc = if target == current {
                    &self.curr_slot_alloc
                } else if self.store.exists(&target) {
                    self.store.peek(&target)?
                } else {
                    trace!("No allocation found for slot {}", target);
                    continue;
                };
                trace!("In slot {} send {:?} DCI for {}", current, format, target);
                msgs.extend(self.retrieve_dci_from_allocation(alloc, format, *k, k1_delay)?);
            }
        }
        Ok(msgs)
    }

    fn retrieve_dci_from_allocation(
        &self,
        alloc: &SlotAllocInfo,
        format: DciFormat,
        k_delay: u32,
        k1_delay: u32,
    ) -> Result<Vec<ControlMessage>, LayerError> {
        let bwp = self.config.bwp_id;
        let mut msgs = Vec::new();

        // a RAR with no delay would point Msg3 at the RAR slot itself
        if !alloc.build_rar_list.is_empty() && k_delay != 0 {
            let rars = alloc
                .build_rar_list
                .iter()
                .map(|rar| {
                    info!(
                        "In slot {} send RAR for RNTI {} preamble {} of slot {}, k2 {}",
                        self.current_slot, rar.ul_msg3_dci.rnti, rar.ra_preamble_id, alloc.sfn, k_delay
                    );
                    Rar {
                        ra_preamble_id: rar.ra_preamble_id,
                        ul_msg3_dci: rar.ul_msg3_dci.clone(),
                        k2_delay: k_delay,
                    }
                })
                .collect();
            msgs.push(ControlMessage::new(bwp, ControlPayload::Rar(rars)));
        }

        // Msg3 is granted through the RAR
        for var_tti in &alloc.var_tti_alloc_info {
            let dci = &var_tti.dci;
            if matches!(dci.var_tti_type, VarTtiType::Ctrl | VarTtiType::Msg3) || dci.format != format {
                continue;
            }
            if dci.sym_end() > self.frame.symbols_per_slot() {
                return Err(LayerError::InvalidState(format!(
                    "DCI for RNTI {} spans symbols {}..{} of a {} symbol slot",
                    dci.rnti,
                    dci.sym_start,
                    dci.sym_end(),
                    self.frame.symbols_per_slot()
                )));
            }
            debug!("Send DCI to RNTI {} from sym {} to {}", dci.rnti, dci.sym_start, dci.sym_end());

            let payload = match format {
                DciFormat::Dl => ControlPayload::DlDci { dci: dci.clone(), k_delay, k1_delay },
                DciFormat::Ul => ControlPayload::UlDci { dci: dci.clone(), k_delay },
            };
            msgs.push(ControlMessage::new(bwp, payload));
        }
        Ok(msgs)
    }

    fn prepare_rbg_allocation_map(&mut self) -> Result<(), LayerError> {
        let per_symbol = self.rbg.prepare(&self.curr_slot_alloc.var_tti_alloc_info);
        for (sym_start, rbs) in per_symbol {
            self.trace_sink.record(TraceRecord::Rb(RbStats {
                sfn: self.current_slot,
                sym_start,
                rbs,
                bwp_id: self.config.bwp_id,
                cell_id: self.config.cell_id,
            }))?;
        }
        Ok(())
    }

    /// Drop the DL data that does not fit the fronthaul, visiting allocations
    /// in a shuffled order
    fn handle_fh_dropping(&mut self) {
        let Some(fh) = self.fh.as_mut() else {
            return;
        };
        let bwp = self.config.bwp_id;
        let allocations = &self.curr_slot_alloc.var_tti_alloc_info;

        let mut order: Vec<usize> = (0..allocations.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(FH_SHUFFLE_SEED));

        let mut to_delete = Vec::new();
        for index in order {
            let dci = &allocations[index].dci;
            if dci.var_tti_type != VarTtiType::Data || dci.format != DciFormat::Dl {
                continue;
            }
            let rbgs = dci.rbg_count() as u32;
            if fh.does_allocation_fit(bwp, dci.mcs, rbgs * dci.num_sym as u32, dci.rank) {
                fh.update_traces_based_on_dropped_data(bwp, dci.mcs, rbgs, dci.num_sym, dci.rank);
            } else {
                debug!("Dropping {} because it does not fit the fronthaul", dci);
                to_delete.push(index);
            }
        }

        to_delete.sort_unstable();
        for index in to_delete.into_iter().rev() {
            if let Some(dropped) = self.curr_slot_alloc.var_tti_alloc_info.remove(index) {
                let dci = &dropped.dci;
                if self.store.has_packet_burst(self.current_slot, dci.sym_start, dci.rnti) {
                    self.store.take_packet_burst(self.current_slot, dci.sym_start, dci.rnti);
                }
                self.counters.fh_dropped += 1;
            }
        }
    }

    fn fill_the_event(&mut self, queue: &mut EventQueue<PhyEvent>) {
        let symbol_period = self.frame.symbol_period();
        for alloc in self.curr_slot_alloc.var_tti_alloc_info.drain(..) {
            let start = symbol_period * alloc.dci.sym_start as u32;
            trace!("Scheduled allocation {} at {:?}", alloc.dci, start);
            queue.schedule(start, PhyEvent::StartVarTti(alloc.dci));
        }
    }

    fn start_var_tti(
        &mut self,
        queue: &mut EventQueue<PhyEvent>,
        dci: Arc<DciInfo>,
    ) -> Result<(), LayerError> {
        // control goes out quasi-omni
        self.spectrum.change_to_quasi_omni();
        self.curr_sym_start = dci.sym_start;

        let period = match (dci.var_tti_type, dci.format) {
            (VarTtiType::Ctrl, DciFormat::Dl) => self.dl_ctrl(queue, &dci)?,
            (VarTtiType::Ctrl, DciFormat::Ul) => self.ul_ctrl(&dci),
            (VarTtiType::Data | VarTtiType::Msg3, DciFormat::Dl) => self.dl_data(queue, &dci),
            (VarTtiType::Data | VarTtiType::Msg3, DciFormat::Ul) => self.ul_data(&dci),
            (VarTtiType::Srs, DciFormat::Ul) => self.ul_srs(&dci),
            (VarTtiType::Srs, DciFormat::Dl) => {
                return Err(LayerError::InvalidState(format!(
                    "SRS allocation for RNTI {} is not uplink",
                    dci.rnti
                )))
            }
        };

        queue.schedule(period, PhyEvent::EndVarTti(dci));
        Ok(())
    }

    fn dl_ctrl(&mut self, queue: &mut EventQueue<PhyEvent>, dci: &DciInfo) -> Result<Duration, LayerError> {
        let mut period = self.frame.symbol_period() * dci.num_sym as u32;

        let mut transmit_csi_rs = false;
        if self.config.csi_rs.enabled {
            let offset = (self.current_slot.normalize() % self.config.csi_rs.periodicity as u64) as u32;
            if self.csi_rs.is_due(offset) {
                period = self.schedule_csi_rs(queue, period, offset);
                transmit_csi_rs = true;
            }
        }

        if self.ctrl_msgs.is_empty() && !transmit_csi_rs {
            trace!("No control messages to send in {}", self.current_slot);
            return Ok(period);
        }

        debug!(
            "gNB TXing DL CTRL with {} msgs, slot {} symbols {}-{}",
            self.ctrl_msgs.len(),
            self.current_slot,
            dci.sym_start,
            dci.sym_end().saturating_sub(1)
        );
        for msg in &self.ctrl_msgs {
            self.trace_sink.record(TraceRecord::TxCtrlMsg(CtrlMsgTrace {
                sfn: self.current_slot,
                cell_id: self.config.cell_id,
                rnti: msg.rnti(),
                bwp_id: self.config.bwp_id,
                message_type: msg.message_type(),
            }))?;
        }

        // control ends before the data period
        self.send_ctrl_channels(period.saturating_sub(TX_GUARD));
        Ok(period)
    }

    /// Shorten the control period to make room for per-UE CSI-RS right after it
    fn schedule_csi_rs(&mut self, queue: &mut EventQueue<PhyEvent>, period: Duration, offset: u32) -> Duration {
        if self.config.csi_rs.model != CsiRsModel::PerUe {
            return period;
        }
        let period = period.saturating_sub(CSI_RS_SPACING * self.ue_devices.len() as u32);
        for (i, rnti) in self.csi_rs.ues_at(offset).iter().enumerate() {
            queue.schedule(period + CSI_RS_SPACING * i as u32, PhyEvent::TransmitCsiRs(*rnti));
        }
        period
    }

    fn transmit_csi_rs(&mut self, rnti: Rnti) {
        self.change_beamforming_vector(rnti);
        debug!("Transmitting CSI-RS towards RNTI {} in {}", rnti, self.current_slot);
        self.counters.csi_rs_tx += 1;
        self.spectrum.start_tx_csi_rs(rnti, 0);
    }

    fn send_ctrl_channels(&mut self, duration: Duration) {
        // the control signal alone occupies the whole bandwidth
        let full_bw: Vec<u32> = (0..self.frame.rb_num()).collect();
        self.set_sub_channels(&full_bw, full_bw.len());

        let msgs = std::mem::take(&mut self.ctrl_msgs);
        self.counters.dl_ctrl_tx += 1;
        self.spectrum.start_tx_dl_control_frames(msgs, duration);
    }

    fn set_sub_channels(&mut self, rbs: &[u32], total_allocated_rbs: usize) {
        let scaling = match self.config.power_allocation {
            PowerAllocationType::UniformPowerAllocationUsed if total_allocated_rbs > 0 => {
                rbs.len() as f64 / total_allocated_rbs as f64
            }
            _ => 1.0,
        };
        self.spectrum.set_tx_allocation(rbs, scaling);
    }

    fn ul_ctrl(&mut self, dci: &DciInfo) -> Duration {
        let period = self.frame.symbol_period() * dci.num_sym as u32;
        self.counters.ul_ctrl_rx += 1;
        debug!(
            "gNB RXing UL CTRL slot {} symbols {}-{}",
            self.current_slot,
            dci.sym_start,
            dci.sym_end().saturating_sub(1)
        );
        period
    }

    fn dl_data(&mut self, queue: &mut EventQueue<PhyEvent>, dci: &Arc<DciInfo>) -> Duration {
        let period = self.frame.symbol_period() * dci.num_sym as u32;

        // a UE may be scheduled with nothing queued: send nothing then
        let burst = match self.store.take_packet_burst(self.current_slot, dci.sym_start, dci.rnti) {
            Some(burst) if !burst.is_empty() => burst,
            _ => return period,
        };

        debug!(
            "gNB TXing DL DATA slot {} symbols {}-{} for RNTI {}",
            self.current_slot,
            dci.sym_start,
            dci.sym_end().saturating_sub(1),
            dci.rnti
        );
        queue.schedule(
            TX_GUARD,
            PhyEvent::SendDataChannels {
                burst,
                duration: period.saturating_sub(TX_GUARD * 2),
                dci: dci.clone(),
            },
        );
        period
    }

    fn ul_data(&mut self, dci: &DciInfo) -> Duration {
        let period = self.frame.symbol_period() * dci.num_sym as u32;

        self.spectrum.add_expected_tb(ExpectedTb {
            ndi: dci.ndi,
            tb_size: dci.tb_size,
            mcs: dci.mcs,
            rank: dci.rank,
            rnti: dci.rnti,
            rb_assignment: self.rbg.to_rb_assignment(&dci.rbg_bitmask),
            harq_process: dci.harq_process,
            rv: dci.rv,
            is_downlink: false,
            sym_start: dci.sym_start,
            num_sym: dci.num_sym,
            sfn: self.current_slot,
        });
        self.counters.ul_tb_expected += 1;
        self.change_beamforming_vector(dci.rnti);

        debug!(
            "gNB RXing UL DATA slot {} symbols {}-{}",
            self.current_slot,
            dci.sym_start,
            dci.sym_end().saturating_sub(1)
        );
        period
    }

    fn ul_srs(&mut self, dci: &DciInfo) -> Duration {
        let period = self.frame.symbol_period() * dci.num_sym as u32;

        self.spectrum.add_expected_srs_rnti(dci.rnti);
        self.counters.srs_expected += 1;
        if !self.change_beamforming_vector(dci.rnti) {
            warn!("SRS scheduled for RNTI {} which is not registered yet", dci.rnti);
        }
        period
    }

    /// Steer towards `rnti`, or quasi-omni if the UE is unknown. Returns
    /// whether the UE is registered.
    fn change_beamforming_vector(&mut self, rnti: Rnti) -> bool {
        let found = self.is_registered(rnti);
        self.spectrum.change_beamforming_vector(found.then_some(rnti));
        found
    }

    fn send_data_channels(
        &mut self,
        now: Duration,
        burst: PacketBurst,
        duration: Duration,
        dci: Arc<DciInfo>,
    ) -> Result<(), LayerError> {
        // one beam per instant
        if self.last_bf_change.map_or(true, |last| now > last) {
            self.last_bf_change = Some(now);
            self.change_beamforming_vector(dci.rnti);
        }

        let total_allocated_rbs = self
            .rbg
            .dl_rbs_at(dci.sym_start)
            .ok_or_else(|| {
                LayerError::InvalidState(format!(
                    "no DL RBG map for symbol {} of {}",
                    dci.sym_start, self.current_slot
                ))
            })?
            .len();
        let rbs = self.rbg.to_rb_assignment(&dci.rbg_bitmask);
        self.set_sub_channels(&rbs, total_allocated_rbs);

        self.counters.dl_data_tx += 1;
        self.spectrum
            .start_tx_data_frames(burst, Vec::new(), dci, duration);
        Ok(())
    }

    fn end_slot(&mut self, queue: &mut EventQueue<PhyEvent>) {
        let to_next_slot =
            (self.last_slot_start + self.frame.slot_period()).saturating_sub(queue.now());

        if let Some(timer) = self.channel.end_slot() {
            queue.cancel(timer);
        }

        if let Some(fh) = self.fh.as_mut() {
            fh.notify_end_slot(self.config.bwp_id, self.current_slot);
        }

        debug!("Slot {} started at {:?} ended", self.current_slot, self.last_slot_start);
        self.current_slot.add(1);
        queue.schedule(to_next_slot, PhyEvent::StartSlot(self.current_slot));
    }

    fn trace_rx(&mut self, rnti: Rnti, message_type: MessageType) -> Result<(), LayerError> {
        self.trace_sink.record(TraceRecord::RxCtrlMsg(CtrlMsgTrace {
            sfn: self.current_slot,
            cell_id: self.config.cell_id,
            rnti,
            bwp_id: self.config.bwp_id,
            message_type,
        }))?;
        Ok(())
    }

    /// Control message received from a UE
    pub fn phy_ctrl_messages_received(&mut self, msg: ControlMessage) -> Result<(), LayerError> {
        let rnti = msg.rnti();
        let message_type = msg.message_type();

        match message_type {
            MessageType::DlCqi => {
                self.trace_rx(rnti, message_type)?;
                info!("Received DL CQI for RNTI {} in slot {}", rnti, self.current_slot);
                self.mac.receive_control_message(msg);
            }
            MessageType::RachPreamble => {
                self.trace_rx(Rnti::NONE, message_type)?;
                if let ControlPayload::RachPreamble { rap_id } = msg.payload {
                    info!("Received RACH preamble {} in slot {}", rap_id, self.current_slot);
                    self.mac.receive_rach_preamble(rap_id);
                }
            }
            MessageType::DlHarq => {
                if !self.attached_rntis.contains(&rnti) {
                    debug!("Ignoring DL HARQ feedback of unattached RNTI {}", rnti);
                    return Ok(());
                }
                self.trace_rx(rnti, message_type)?;
                info!("Received DL HARQ for RNTI {} in slot {}", rnti, self.current_slot);
                self.mac.receive_control_message(msg);
            }
            _ => {
                self.trace_rx(Rnti::NONE, message_type)?;
                self.mac.receive_control_message(msg);
            }
        }
        Ok(())
    }

    /// UL HARQ outcome from the spectrum model; only attached UEs reach the MAC
    pub fn report_ul_harq_feedback(&mut self, info: UlHarqInfo) {
        if self.attached_rntis.contains(&info.rnti) {
            info!(
                "Received UL HARQ feedback {} for RNTI {}, forwarding to the scheduler",
                info.received_ok, info.rnti
            );
            self.mac.ul_harq_feedback(info);
        }
    }

    /// Decoded uplink data; the MAC gets it after the TB decode latency
    pub fn phy_data_packet_received(&mut self, queue: &mut EventQueue<PhyEvent>, pdu: Bytes) {
        queue.schedule(self.config.tb_decode_latency(), PhyEvent::DeliverPhyPdu(pdu));
    }
}

impl EventHandler for GnbPhy {
    type Event = PhyEvent;
    type Error = LayerError;

    fn handle(&mut self, queue: &mut EventQueue<PhyEvent>, event: PhyEvent) -> Result<(), LayerError> {
        if let Some(err) = self.sap_error.take() {
            return Err(err);
        }
        match event {
            PhyEvent::StartSlot(sfn) => self.start_slot(queue, sfn)?,
            PhyEvent::EndSlot => self.end_slot(queue),
            PhyEvent::StartVarTti(dci) => self.start_var_tti(queue, dci)?,
            PhyEvent::EndVarTti(dci) => {
                trace!("DCI started at symbol {} lasting {} symbols finished", dci.sym_start, dci.num_sym)
            }
            PhyEvent::UlCtrl(dci) => {
                self.ul_ctrl(&dci);
            }
            PhyEvent::UlSrs(dci) => {
                self.ul_srs(&dci);
            }
            PhyEvent::SendDataChannels { burst, duration, dci } => {
                self.send_data_channels(queue.now(), burst, duration, dci)?
            }
            PhyEvent::TransmitCsiRs(rnti) => self.transmit_csi_rs(rnti),
            PhyEvent::ChannelAccessGranted(time) => self.channel_access_granted(queue, time),
            PhyEvent::ChannelAccessLost => self.channel.on_lost(),
            PhyEvent::DeliverPhyPdu(pdu) => self.mac.receive_phy_pdu(pdu),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::run_until;
    use common::SlotType;
    use interfaces::message_types::{DlCqiInfo, DlHarqInfo};
    use interfaces::trace::MemoryTraceSink;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct MacLog {
        current: Vec<SfnSf>,
        dl_indications: Vec<(SfnSf, SlotType)>,
        ul_indications: Vec<(SfnSf, SlotType)>,
        received: Vec<ControlMessage>,
        rach: Vec<u32>,
        ul_harq: Vec<UlHarqInfo>,
        pdus: Vec<Bytes>,
    }

    /// DL CTRL plus optional DL data in DL slots, UL CTRL in UL slots
    struct FakeMac {
        log: Rc<RefCell<MacLog>>,
        dl_rnti: Option<Rnti>,
    }

    impl GnbPhySapUser for FakeMac {
        fn set_current_sfn(&mut self, sfn: SfnSf) {
            self.log.borrow_mut().current.push(sfn);
        }

        fn slot_dl_indication(&mut self, sfn: SfnSf, slot_type: SlotType, phy: &mut dyn PhySapProvider) {
            self.log.borrow_mut().dl_indications.push((sfn, slot_type));
            let mut info = SlotAllocInfo::new(sfn);
            info.push(self.dl_ctrl_dci());
            if let Some(rnti) = self.dl_rnti {
                info.push(DciInfo::new(rnti, DciFormat::Dl, VarTtiType::Data, 1, 4, vec![true; 4]));
                phy.set_mac_pdu(Bytes::from_static(b"pdu"), sfn, 1, rnti);
            }
            phy.set_slot_alloc_info(info);
        }

        fn slot_ul_indication(&mut self, sfn: SfnSf, slot_type: SlotType, phy: &mut dyn PhySapProvider) {
            self.log.borrow_mut().ul_indications.push((sfn, slot_type));
            let mut info = SlotAllocInfo::new(sfn);
            info.push(self.ul_ctrl_dci());
            phy.set_slot_alloc_info(info);
        }

        fn dl_ctrl_dci(&self) -> DciInfo {
            DciInfo::new(Rnti::NONE, DciFormat::Dl, VarTtiType::Ctrl, 0, 1, vec![true; 4])
        }

        fn ul_ctrl_dci(&self) -> DciInfo {
            DciInfo::new(Rnti::NONE, DciFormat::Ul, VarTtiType::Ctrl, 13, 1, vec![true; 4])
        }

        fn dl_ctrl_symbols(&self) -> u8 {
            1
        }

        fn num_rb_per_rbg(&self) -> u32 {
            1
        }

        fn receive_control_message(&mut self, msg: ControlMessage) {
            self.log.borrow_mut().received.push(msg);
        }

        fn receive_rach_preamble(&mut self, rap_id: u32) {
            self.log.borrow_mut().rach.push(rap_id);
        }

        fn ul_harq_feedback(&mut self, info: UlHarqInfo) {
            self.log.borrow_mut().ul_harq.push(info);
        }

        fn receive_phy_pdu(&mut self, pdu: Bytes) {
            self.log.borrow_mut().pdus.push(pdu);
        }
    }

    #[derive(Default)]
    struct SpectrumLog {
        data: Vec<(Rnti, usize, Duration)>,
        ctrl: Vec<(Vec<ControlMessage>, Duration)>,
        expected_tbs: Vec<ExpectedTb>,
        srs: Vec<Rnti>,
        allocations: Vec<(usize, f64)>,
        csi_rs: Vec<Rnti>,
        beams: Vec<Option<Rnti>>,
        quasi_omni: usize,
    }

    struct FakeSpectrum(Rc<RefCell<SpectrumLog>>);

    impl SpectrumPhy for FakeSpectrum {
        fn start_tx_data_frames(
            &mut self,
            burst: PacketBurst,
            _ctrl_msgs: Vec<ControlMessage>,
            dci: Arc<DciInfo>,
            duration: Duration,
        ) {
            self.0.borrow_mut().data.push((dci.rnti, burst.len(), duration));
        }

        fn start_tx_dl_control_frames(&mut self, msgs: Vec<ControlMessage>, duration: Duration) {
            self.0.borrow_mut().ctrl.push((msgs, duration));
        }

        fn add_expected_tb(&mut self, tb: ExpectedTb) {
            self.0.borrow_mut().expected_tbs.push(tb);
        }

        fn add_expected_srs_rnti(&mut self, rnti: Rnti) {
            self.0.borrow_mut().srs.push(rnti);
        }

        fn set_tx_allocation(&mut self, rbs: &[u32], psd_scaling: f64) {
            self.0.borrow_mut().allocations.push((rbs.len(), psd_scaling));
        }

        fn start_tx_csi_rs(&mut self, rnti: Rnti, _beam_id: u16) {
            self.0.borrow_mut().csi_rs.push(rnti);
        }

        fn change_beamforming_vector(&mut self, ue: Option<Rnti>) {
            self.0.borrow_mut().beams.push(ue);
        }

        fn change_to_quasi_omni(&mut self) {
            self.0.borrow_mut().quasi_omni += 1;
        }
    }

    /// Answers from a script, then grants for one second
    struct ScriptedCam(VecDeque<AccessResponse>);

    impl ChannelAccessManager for ScriptedCam {
        fn request_access(&mut self) -> AccessResponse {
            self.0.pop_front().unwrap_or(AccessResponse::Immediate(AccessOutcome::Granted(
                Duration::from_secs(1),
            )))
        }
    }

    #[derive(Default)]
    struct FhLog {
        updates: usize,
        end_slots: Vec<SfnSf>,
    }

    struct FakeFh {
        fits: bool,
        log: Rc<RefCell<FhLog>>,
    }

    impl FronthaulControl for FakeFh {
        fn control_method(&self) -> FhControlMethod {
            FhControlMethod::Dropping
        }

        fn does_allocation_fit(&self, _bwp: BwpId, _mcs: u8, _n_regs: u32, _rank: u8) -> bool {
            self.fits
        }

        fn update_traces_based_on_dropped_data(&mut self, _bwp: BwpId, _mcs: u8, _n_rbg: u32, _n_sym: u8, _rank: u8) {
            self.log.borrow_mut().updates += 1;
        }

        fn notify_end_slot(&mut self, _bwp: BwpId, sfn: SfnSf) {
            self.log.borrow_mut().end_slots.push(sfn);
        }
    }

    struct Harness {
        phy: GnbPhy,
        queue: EventQueue<PhyEvent>,
        mac: Rc<RefCell<MacLog>>,
        spectrum: Rc<RefCell<SpectrumLog>>,
        trace: MemoryTraceSink,
    }

    impl Harness {
        fn new(config: PhyConfig, dl_rnti: Option<Rnti>, cam: Vec<AccessResponse>) -> Self {
            let mac = Rc::new(RefCell::new(MacLog::default()));
            let spectrum = Rc::new(RefCell::new(SpectrumLog::default()));
            let trace = MemoryTraceSink::new();
            let phy = GnbPhy::new(
                config,
                Box::new(FakeMac { log: mac.clone(), dl_rnti }),
                Box::new(FakeSpectrum(spectrum.clone())),
                Box::new(ScriptedCam(cam.into())),
                Box::new(trace.clone()),
            )
            .unwrap();
            Self { phy, queue: EventQueue::new(), mac, spectrum, trace }
        }

        fn with_fronthaul(mut self, fh: FakeFh) -> Self {
            self.phy = self.phy.with_fronthaul(Box::new(fh));
            self
        }

        fn start(&mut self) {
            self.phy.start_event_loop(&mut self.queue, 0, 0, 0);
        }

        fn run_slots(&mut self, slots: u32) {
            let stop = self.phy.frame().slot_period() * slots;
            run_until(&mut self.phy, &mut self.queue, stop, None).unwrap();
        }

        fn sent_messages(&self) -> Vec<ControlMessage> {
            self.spectrum
                .borrow()
                .ctrl
                .iter()
                .flat_map(|(msgs, _)| msgs.clone())
                .collect()
        }
    }

    fn config(numerology: u8) -> PhyConfig {
        PhyConfig {
            numerology,
            channel_bandwidth_hz: 100_000_000,
            ..Default::default()
        }
    }

    fn slot_with(sfn: SfnSf, dcis: Vec<DciInfo>) -> SlotAllocInfo {
        let mut info = SlotAllocInfo::new(sfn);
        for dci in dcis {
            info.push(dci);
        }
        info
    }

    #[test]
    fn test_numerology4_all_flexible_timing() {
        let mut h = Harness::new(config(4), Some(Rnti(1)), vec![]);
        let maps = h.phy.maps();
        assert_eq!(maps.generate_dl[&0], vec![2]);
        assert_eq!(maps.to_send_dl[&0], vec![0]);
        assert_eq!(maps.generate_ul[&0], vec![4]);
        assert_eq!(maps.dl_harq_fb_position[&0], 2);

        h.start();
        h.run_slots(2);
        {
            let mac = h.mac.borrow();
            assert_eq!(mac.dl_indications[0], (SfnSf::new(0, 0, 2, 4), SlotType::F));
            assert_eq!(mac.ul_indications[0], (SfnSf::new(0, 0, 4, 4), SlotType::F));
        }
        // the grant generated in slot 0 is not on air before slot 2
        assert!(!h.sent_messages().iter().any(|m| m.message_type() == MessageType::DlDci));

        h.run_slots(3);
        let dl_dci = h
            .sent_messages()
            .into_iter()
            .find_map(|m| match m.payload {
                ControlPayload::DlDci { dci, k_delay, k1_delay } => Some((dci, k_delay, k1_delay)),
                _ => None,
            })
            .unwrap();
        assert_eq!(dl_dci.0.rnti, Rnti(1));
        assert_eq!(dl_dci.1, 0);
        assert_eq!(dl_dci.2, 2);
        assert_eq!(h.spectrum.borrow().data.len(), 1);
    }

    #[test]
    fn test_mib_and_sib1_broadcast() {
        let mut h = Harness::new(config(0), None, vec![]);
        h.phy.set_sib1(Sib1 { cell_id: 7, ..Default::default() });
        h.start();
        h.run_slots(6);

        let sent = h.sent_messages();
        let mib = sent
            .iter()
            .find_map(|m| match &m.payload {
                ControlPayload::Mib(mib) => Some(mib.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(mib, Mib { numerology: 0, dl_bandwidth: 1000, system_frame_number: 1 });
        assert_eq!(sent[0].message_type(), MessageType::Mib);
        assert!(sent
            .iter()
            .any(|m| matches!(&m.payload, ControlPayload::Sib1(sib1) if sib1.cell_id == 7)));
    }

    #[test]
    fn test_secondary_phy_stays_silent_without_allocations() {
        let mut h = Harness::new(PhyConfig { primary: false, ..config(0) }, None, vec![]);
        h.start();
        h.run_slots(2);
        assert_eq!(h.phy.counters().access_requests, 0);
        assert!(h.spectrum.borrow().ctrl.is_empty());
        assert_eq!(h.phy.counters().slots, 2);
    }

    #[test]
    fn test_denied_slot_is_requeued() {
        let denied = AccessResponse::Immediate(AccessOutcome::Denied);
        let mut h = Harness::new(PhyConfig { primary: false, ..config(0) }, None, vec![denied]);
        let slot0 = SfnSf::new(0, 0, 0, 0);
        let slot1 = slot0.plus(1);
        {
            let mut sap = h.phy.sap_provider();
            sap.set_slot_alloc_info(slot_with(
                slot0,
                vec![
                    DciInfo::new(Rnti::NONE, DciFormat::Dl, VarTtiType::Ctrl, 0, 1, vec![true; 4]),
                    DciInfo::new(Rnti(1), DciFormat::Dl, VarTtiType::Data, 1, 4, vec![true; 4]),
                ],
            ));
            sap.set_mac_pdu(Bytes::from_static(b"a"), slot0, 1, Rnti(1));
        }
        h.start();
        h.run_slots(1);

        assert!(h.phy.store().exists(&slot1));
        assert!(!h.phy.store().exists(&slot0));
        assert!(h.phy.store().has_packet_burst(slot1, 1, Rnti(1)));
        assert!(!h.phy.store().has_packet_burst(slot0, 1, Rnti(1)));
        assert_eq!(h.phy.counters().deferred_slots, 1);
        assert_eq!(h.phy.channel_status(), ChannelStatus::None);
        assert!(h.mac.borrow().current.is_empty());
        assert!(h.spectrum.borrow().data.is_empty());

        h.run_slots(2);
        assert_eq!(h.phy.counters().access_requests, 2);
        let data = &h.spectrum.borrow().data;
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].0, Rnti(1));
        assert_eq!(h.mac.borrow().current, vec![slot1]);
    }

    #[test]
    fn test_deferred_grant_and_release() {
        let deferred = AccessResponse::Deferred {
            after: Duration::from_micros(100),
            outcome: AccessOutcome::Granted(Duration::from_millis(5)),
        };
        let denied_later = AccessResponse::Deferred {
            after: Duration::from_micros(100),
            outcome: AccessOutcome::Denied,
        };
        let mut h = Harness::new(config(0), None, vec![deferred, denied_later]);
        h.start();
        h.run_slots(1);

        // granted during slot 0, after the MIB slot was requeued
        assert_eq!(h.phy.channel_status(), ChannelStatus::Granted);
        assert_eq!(h.phy.counters().deferred_slots, 1);
        assert!(h.spectrum.borrow().ctrl.is_empty());

        h.run_slots(2);
        // slot 1 sends the MIB, then gives up the idle channel
        assert_eq!(h.sent_messages()[0].message_type(), MessageType::Mib);
        assert_eq!(h.phy.channel_status(), ChannelStatus::ToLose);

        h.run_slots(3);
        assert_eq!(h.phy.channel_status(), ChannelStatus::None);
        assert_eq!(h.phy.counters().access_requests, 1);

        h.run_slots(4);
        // slot 3 asks again and is refused
        assert_eq!(h.phy.counters().access_requests, 2);
        assert_eq!(h.phy.counters().deferred_slots, 2);
        assert_eq!(h.phy.channel_status(), ChannelStatus::None);
    }

    #[test]
    fn test_fronthaul_dropping() {
        let fh_log = Rc::new(RefCell::new(FhLog::default()));
        let mut h = Harness::new(PhyConfig { primary: false, ..config(0) }, Some(Rnti(1)), vec![])
            .with_fronthaul(FakeFh { fits: false, log: fh_log.clone() });
        h.start();
        h.run_slots(4);

        // slots 2 and 3 carry DL data, none of it fits
        assert_eq!(h.phy.counters().fh_dropped, 2);
        assert!(h.spectrum.borrow().data.is_empty());
        assert_eq!(fh_log.borrow().updates, 0);
        assert_eq!(fh_log.borrow().end_slots.len(), 3);
        assert!(!h.sent_messages().is_empty());
    }

    #[test]
    fn test_fronthaul_fitting_data_is_sent() {
        let fh_log = Rc::new(RefCell::new(FhLog::default()));
        let mut h = Harness::new(config(0), Some(Rnti(1)), vec![])
            .with_fronthaul(FakeFh { fits: true, log: fh_log.clone() });
        h.start();
        h.run_slots(4);

        assert_eq!(fh_log.borrow().updates, 2);
        assert_eq!(h.spectrum.borrow().data.len(), 2);
        assert_eq!(h.phy.counters().fh_dropped, 0);
    }

    #[test]
    fn test_power_split_and_single_beam_per_instant() {
        let mut h = Harness::new(PhyConfig { primary: false, ..config(0) }, None, vec![]);
        h.phy.register_ue(Imsi(1), Rnti(1)).unwrap();
        h.phy.register_ue(Imsi(2), Rnti(2)).unwrap();
        let slot0 = SfnSf::new(0, 0, 0, 0);
        {
            let mut sap = h.phy.sap_provider();
            let mut info = slot_with(
                slot0,
                vec![
                    DciInfo::new(Rnti(1), DciFormat::Dl, VarTtiType::Data, 0, 4, vec![true, true, false, false]),
                    DciInfo::new(Rnti(2), DciFormat::Dl, VarTtiType::Data, 0, 4, vec![false, false, true, false]),
                ],
            );
            // both share symbols 0..4
            info.num_sym_alloc = 4;
            sap.set_slot_alloc_info(info);
            sap.set_mac_pdu(Bytes::from_static(b"a"), slot0, 0, Rnti(1));
            sap.set_mac_pdu(Bytes::from_static(b"b"), slot0, 0, Rnti(2));
        }
        h.start();
        h.run_slots(1);

        let spectrum = h.spectrum.borrow();
        assert_eq!(spectrum.data.len(), 2);
        let symbol = h.phy.frame().symbol_period();
        assert_eq!(spectrum.data[0].2, symbol * 4 - Duration::from_nanos(2));
        assert_eq!(spectrum.allocations.len(), 2);
        assert_eq!(spectrum.allocations[0].0, 2);
        assert!((spectrum.allocations[0].1 - 2.0 / 3.0).abs() < 1e-9);
        assert!((spectrum.allocations[1].1 - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(spectrum.beams, vec![Some(Rnti(1))]);
        assert_eq!(spectrum.quasi_omni, 2);
    }

    #[test]
    fn test_full_bandwidth_power_allocation() {
        let config = PhyConfig {
            primary: false,
            power_allocation: PowerAllocationType::UniformPowerAllocationBw,
            ..config(0)
        };
        let mut h = Harness::new(config, None, vec![]);
        let slot0 = SfnSf::new(0, 0, 0, 0);
        {
            let mut sap = h.phy.sap_provider();
            sap.set_slot_alloc_info(slot_with(
                slot0,
                vec![DciInfo::new(Rnti(3), DciFormat::Dl, VarTtiType::Data, 2, 4, vec![true, false])],
            ));
            sap.set_mac_pdu(Bytes::from_static(b"a"), slot0, 2, Rnti(3));
        }
        h.start();
        h.run_slots(1);
        let spectrum = h.spectrum.borrow();
        assert_eq!(spectrum.allocations, vec![(1, 1.0)]);
        // unregistered UE: quasi-omni beam
        assert_eq!(spectrum.beams, vec![None]);
    }

    #[test]
    fn test_dl_data_without_burst_sends_nothing() {
        let mut h = Harness::new(PhyConfig { primary: false, ..config(0) }, None, vec![]);
        let slot0 = SfnSf::new(0, 0, 0, 0);
        h.phy.sap_provider().set_slot_alloc_info(slot_with(
            slot0,
            vec![DciInfo::new(Rnti(1), DciFormat::Dl, VarTtiType::Data, 0, 4, vec![true])],
        ));
        h.start();
        h.run_slots(1);
        assert!(h.spectrum.borrow().data.is_empty());
        assert_eq!(h.phy.counters().dl_data_tx, 0);
    }

    #[test]
    fn test_ul_data_and_srs_reception() {
        let mut h = Harness::new(PhyConfig { primary: false, ..config(0) }, None, vec![]);
        h.phy.register_ue(Imsi(10), Rnti(5)).unwrap();
        let slot0 = SfnSf::new(0, 0, 0, 0);
        let mut ul = DciInfo::new(Rnti(5), DciFormat::Ul, VarTtiType::Data, 2, 6, vec![false, true]);
        ul.tb_size = 320;
        ul.harq_process = 3;
        h.phy.sap_provider().set_slot_alloc_info(slot_with(
            slot0,
            vec![
                ul,
                DciInfo::new(Rnti(9), DciFormat::Ul, VarTtiType::Srs, 12, 1, vec![true, true]),
            ],
        ));
        h.start();
        h.run_slots(1);

        let spectrum = h.spectrum.borrow();
        assert_eq!(spectrum.expected_tbs.len(), 1);
        let tb = &spectrum.expected_tbs[0];
        assert_eq!(tb.rnti, Rnti(5));
        assert_eq!(tb.rb_assignment, vec![1]);
        assert_eq!(tb.tb_size, 320);
        assert_eq!(tb.harq_process, 3);
        assert!(!tb.is_downlink);
        assert_eq!(tb.sfn, slot0);
        assert_eq!(spectrum.srs, vec![Rnti(9)]);
        assert_eq!(spectrum.beams, vec![Some(Rnti(5)), None]);
    }

    #[test]
    fn test_csi_rs_per_ue() {
        let mut config = config(0);
        config.csi_rs.enabled = true;
        let mut h = Harness::new(config, None, vec![]);
        h.phy.register_ue(Imsi(1), Rnti(1)).unwrap();
        h.phy.register_ue(Imsi(2), Rnti(2)).unwrap();
        assert!(!h.phy.register_ue(Imsi(2), Rnti(3)).unwrap());
        h.start();
        h.run_slots(1);

        let spectrum = h.spectrum.borrow();
        assert_eq!(spectrum.csi_rs, vec![Rnti(1)]);
        assert_eq!(spectrum.beams, vec![Some(Rnti(1))]);
        let symbol = h.phy.frame().symbol_period();
        // two registered UEs shorten the control period by 4 ns
        assert_eq!(spectrum.ctrl[0].1, symbol - Duration::from_nanos(5));
    }

    #[test]
    fn test_rar_sent_with_k2_delay() {
        let mut h = Harness::new(PhyConfig { primary: false, ..config(0) }, None, vec![]);
        let slot0 = SfnSf::new(0, 0, 0, 0);
        let slot2 = slot0.plus(2);
        let msg3 = Arc::new(DciInfo::new(Rnti(4), DciFormat::Ul, VarTtiType::Msg3, 2, 2, vec![true]));
        {
            let mut sap = h.phy.sap_provider();
            sap.set_slot_alloc_info(slot_with(
                slot0,
                vec![DciInfo::new(Rnti::NONE, DciFormat::Dl, VarTtiType::Ctrl, 0, 1, vec![true])],
            ));
            let mut target = slot_with(slot2, vec![(*msg3).clone()]);
            target.build_rar_list.push(common::RarInfo {
                ra_preamble_id: 12,
                ul_msg3_dci: msg3.clone(),
                k2_delay: 0,
            });
            sap.set_slot_alloc_info(target);
        }
        h.start();
        h.run_slots(1);

        let sent = h.sent_messages();
        assert_eq!(sent.len(), 1);
        match &sent[0].payload {
            ControlPayload::Rar(rars) => {
                assert_eq!(rars.len(), 1);
                assert_eq!(rars[0].ra_preamble_id, 12);
                assert_eq!(rars[0].k2_delay, 2);
            }
            other => panic!("expected a RAR, got {:?}", other),
        }
    }

    #[test]
    fn test_statistics_are_traced() {
        let mut h = Harness::new(config(0), Some(Rnti(1)), vec![]);
        h.start();
        h.run_slots(3);
        let records = h.trace.records();
        let data_stats: Vec<&SlotStats> = records
            .iter()
            .filter_map(|r| match r {
                TraceRecord::SlotData(s) => Some(s),
                _ => None,
            })
            .collect();
        // slot 0 carries the MIB, slot 1 is empty, slot 2 has data
        assert_eq!(data_stats.len(), 2);
        assert_eq!(data_stats[1].sfn, SfnSf::new(0, 2, 0, 0));
        assert_eq!(data_stats[1].active_ues, 1);
        assert_eq!(data_stats[1].used_sym, 4);
        assert_eq!(data_stats[1].used_reg, 16);
        assert!(records.iter().any(|r| matches!(r, TraceRecord::Rb(rb) if rb.rbs == vec![0, 1, 2, 3])));
        assert!(records.iter().any(|r| matches!(r, TraceRecord::TxCtrlMsg(m) if m.message_type == MessageType::DlDci)));
    }

    #[test]
    fn test_received_control_dispatch() {
        let mut h = Harness::new(config(0), None, vec![]);
        let bwp = BwpId(0);
        let harq = |rnti| {
            ControlMessage::new(
                bwp,
                ControlPayload::DlHarq(DlHarqInfo { rnti, harq_process: 0, ack: true, num_retx: 0 }),
            )
        };

        h.phy.phy_ctrl_messages_received(harq(Rnti(1))).unwrap();
        assert!(h.mac.borrow().received.is_empty());

        h.phy.add_ue(Rnti(1));
        h.phy.phy_ctrl_messages_received(harq(Rnti(1))).unwrap();
        h.phy
            .phy_ctrl_messages_received(ControlMessage::new(
                bwp,
                ControlPayload::DlCqi(DlCqiInfo { rnti: Rnti(2), rank: 1, wideband_cqi: 9 }),
            ))
            .unwrap();
        h.phy
            .phy_ctrl_messages_received(ControlMessage::new(bwp, ControlPayload::RachPreamble { rap_id: 17 }))
            .unwrap();
        h.phy
            .phy_ctrl_messages_received(ControlMessage::new(bwp, ControlPayload::Sr { rnti: Rnti(2) }))
            .unwrap();

        let mac = h.mac.borrow();
        let types: Vec<MessageType> = mac.received.iter().map(|m| m.message_type()).collect();
        assert_eq!(types, vec![MessageType::DlHarq, MessageType::DlCqi, MessageType::Sr]);
        assert_eq!(mac.rach, vec![17]);
        let rx_traces = h
            .trace
            .records()
            .into_iter()
            .filter(|r| matches!(r, TraceRecord::RxCtrlMsg(_)))
            .count();
        assert_eq!(rx_traces, 4);
    }

    #[test]
    fn test_ul_harq_and_ue_removal() {
        let mut h = Harness::new(config(0), None, vec![]);
        let info = |rnti| UlHarqInfo { rnti, harq_process: 1, received_ok: false, num_retx: 0 };

        h.phy.report_ul_harq_feedback(info(Rnti(8)));
        h.phy.add_ue(Rnti(8));
        h.phy.report_ul_harq_feedback(info(Rnti(8)));
        assert_eq!(h.mac.borrow().ul_harq.len(), 1);

        h.phy.remove_ue(Rnti(8)).unwrap();
        assert!(matches!(h.phy.remove_ue(Rnti(8)), Err(LayerError::UeNotAttached(Rnti(8)))));
    }

    #[test]
    fn test_phy_pdu_delivered_after_decode_latency() {
        let mut h = Harness::new(config(0), None, vec![]);
        h.phy.phy_data_packet_received(&mut h.queue, Bytes::from_static(b"ul"));
        run_until(&mut h.phy, &mut h.queue, Duration::from_micros(100), None).unwrap();
        assert!(h.mac.borrow().pdus.is_empty());
        run_until(&mut h.phy, &mut h.queue, Duration::from_micros(101), None).unwrap();
        assert_eq!(h.mac.borrow().pdus, vec![Bytes::from_static(b"ul")]);
    }

    #[test]
    fn test_numerology_mismatch_is_fatal() {
        let mut h = Harness::new(config(1), None, vec![]);
        let err = h
            .phy
            .handle(&mut h.queue, PhyEvent::StartSlot(SfnSf::new(0, 0, 0, 2)))
            .unwrap_err();
        assert!(matches!(err, LayerError::NumerologyMismatch { expected: 1, found: 2 }));
    }

    #[test]
    fn test_allocation_with_wrong_numerology_fails_run() {
        let mut h = Harness::new(config(1), None, vec![]);
        let wrong = SfnSf::new(0, 0, 1, 2);
        h.phy.sap_provider().set_slot_alloc_info(SlotAllocInfo::new(wrong));
        assert!(!h.phy.store().exists(&wrong));

        h.start();
        let stop = h.phy.frame().slot_period() * 2;
        let err = run_until(&mut h.phy, &mut h.queue, stop, None).unwrap_err();
        assert!(matches!(err, LayerError::NumerologyMismatch { expected: 1, found: 2 }));
        assert_eq!(h.phy.counters().slots, 0);
    }

    /// Hands the PHY an allocation for another numerology on its first DL indication
    struct WrongNumerologyMac(FakeMac);

    impl GnbPhySapUser for WrongNumerologyMac {
        fn set_current_sfn(&mut self, sfn: SfnSf) {
            self.0.set_current_sfn(sfn);
        }

        fn slot_dl_indication(&mut self, sfn: SfnSf, _slot_type: SlotType, phy: &mut dyn PhySapProvider) {
            let wrong = SfnSf::new(sfn.frame(), sfn.subframe(), 0, sfn.numerology() + 1);
            phy.set_slot_alloc_info(SlotAllocInfo::new(wrong));
        }

        fn slot_ul_indication(&mut self, sfn: SfnSf, slot_type: SlotType, phy: &mut dyn PhySapProvider) {
            self.0.slot_ul_indication(sfn, slot_type, phy);
        }

        fn dl_ctrl_dci(&self) -> DciInfo {
            self.0.dl_ctrl_dci()
        }

        fn ul_ctrl_dci(&self) -> DciInfo {
            self.0.ul_ctrl_dci()
        }

        fn dl_ctrl_symbols(&self) -> u8 {
            self.0.dl_ctrl_symbols()
        }

        fn num_rb_per_rbg(&self) -> u32 {
            self.0.num_rb_per_rbg()
        }

        fn receive_control_message(&mut self, msg: ControlMessage) {
            self.0.receive_control_message(msg);
        }

        fn receive_rach_preamble(&mut self, rap_id: u32) {
            self.0.receive_rach_preamble(rap_id);
        }

        fn ul_harq_feedback(&mut self, info: UlHarqInfo) {
            self.0.ul_harq_feedback(info);
        }

        fn receive_phy_pdu(&mut self, pdu: Bytes) {
            self.0.receive_phy_pdu(pdu);
        }
    }

    #[test]
    fn test_mac_allocation_with_wrong_numerology_fails_slot() {
        let log = Rc::new(RefCell::new(MacLog::default()));
        let mut phy = GnbPhy::new(
            config(1),
            Box::new(WrongNumerologyMac(FakeMac { log: log.clone(), dl_rnti: None })),
            Box::new(FakeSpectrum(Rc::new(RefCell::new(SpectrumLog::default())))),
            Box::new(ScriptedCam(VecDeque::new())),
            Box::new(MemoryTraceSink::new()),
        )
        .unwrap();
        let mut queue = EventQueue::new();
        phy.start_event_loop(&mut queue, 0, 0, 0);

        let stop = phy.frame().slot_period() * 4;
        let err = run_until(&mut phy, &mut queue, stop, None).unwrap_err();
        assert!(matches!(err, LayerError::NumerologyMismatch { expected: 1, found: 2 }));
        assert_eq!(phy.counters().slots, 1);
        assert_eq!(log.borrow().current.len(), 1);
    }

    #[test]
    fn test_empty_slot_asks_for_channel_when_ul_is_scheduled() {
        let mut h = Harness::new(PhyConfig { primary: false, ..config(0) }, None, vec![]);
        let slot0 = SfnSf::new(0, 0, 0, 0);
        let ul_slot = slot0.plus(h.phy.config().n2);
        h.phy.sap_provider().set_slot_alloc_info(slot_with(
            ul_slot,
            vec![DciInfo::new(Rnti(4), DciFormat::Ul, VarTtiType::Data, 1, 12, vec![true; 4])],
        ));
        h.start();
        h.run_slots(1);

        // slot 0 is empty but the UL grant for slot 0 + N2 goes out in it
        assert_eq!(h.phy.counters().access_requests, 1);
        assert_eq!(h.phy.counters().deferred_slots, 0);
        assert_eq!(h.mac.borrow().current, vec![slot0]);
        assert_eq!(h.phy.counters().ul_tb_expected, 0);

        h.run_slots(3);
        assert_eq!(h.phy.counters().ul_tb_expected, 1);
    }

    #[test]
    fn test_denied_slot_still_receives_uplink() {
        let denied = AccessResponse::Immediate(AccessOutcome::Denied);
        let mut h = Harness::new(PhyConfig { primary: false, ..config(0) }, None, vec![denied]);
        let slot0 = SfnSf::new(0, 0, 0, 0);
        {
            let mut sap = h.phy.sap_provider();
            sap.set_slot_alloc_info(slot_with(
                slot0,
                vec![
                    DciInfo::new(Rnti::NONE, DciFormat::Dl, VarTtiType::Ctrl, 0, 1, vec![true; 4]),
                    DciInfo::new(Rnti(1), DciFormat::Dl, VarTtiType::Data, 1, 4, vec![true; 4]),
                    DciInfo::new(Rnti(2), DciFormat::Ul, VarTtiType::Srs, 12, 1, vec![true; 4]),
                    DciInfo::new(Rnti::NONE, DciFormat::Ul, VarTtiType::Ctrl, 13, 1, vec![true; 4]),
                ],
            ));
            sap.set_mac_pdu(Bytes::from_static(b"a"), slot0, 1, Rnti(1));
        }
        h.start();
        h.run_slots(1);

        let counters = h.phy.counters();
        assert_eq!(counters.deferred_slots, 1);
        assert_eq!(counters.ul_ctrl_rx, 1);
        assert_eq!(counters.srs_expected, 1);
        assert_eq!(counters.dl_ctrl_tx, 0);
        assert_eq!(counters.dl_data_tx, 0);
        let spectrum = h.spectrum.borrow();
        assert_eq!(spectrum.srs, vec![Rnti(2)]);
        assert!(spectrum.ctrl.is_empty());
        assert!(spectrum.data.is_empty());
    }

    #[test]
    fn test_delay_setters_regenerate_maps() {
        let mut h = Harness::new(config(0), None, vec![]);
        h.phy.set_n1_delay(3).unwrap();
        assert_eq!(h.phy.maps().dl_harq_fb_position[&0], 3);
        h.phy.set_n2_delay(4).unwrap();
        assert_eq!(h.phy.maps().generate_ul[&0], vec![6]);
        assert!(h.phy.set_n0_delay(2).is_err());
        assert_eq!(h.phy.config().n0, 0);
        h.phy.set_pattern("DL|DL|DL|").unwrap();
        assert!(h.phy.maps().generate_ul.is_empty());
        assert!(h.phy.set_pattern("DL|X|").is_err());
    }

    #[test]
    fn test_dl_only_band_never_asks_for_uplink() {
        let config = PhyConfig { pattern: "DL|DL|DL|DL|".parse().unwrap(), ..config(0) };
        let mut h = Harness::new(config, Some(Rnti(1)), vec![]);
        h.start();
        h.run_slots(6);
        let mac = h.mac.borrow();
        assert!(mac.ul_indications.is_empty());
        assert!(!mac.dl_indications.is_empty());
        assert!(mac.dl_indications.iter().all(|(_, ty)| *ty == SlotType::Dl));
    }
}
