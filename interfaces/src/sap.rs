//! Service access points between the gNB PHY and its collaborators
//!
//! The PHY owns one implementation of each trait, handed over at construction.
//! MAC callbacks that produce allocations receive a `PhySapProvider` so the
//! MAC can push results back into the PHY while the indication is running.

use crate::message_types::{ControlMessage, ExpectedTb, UlHarqInfo};
use bytes::Bytes;
use common::{BwpId, DciInfo, PacketBurst, Rnti, SfnSf, SlotAllocInfo, SlotType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// PHY services available to the MAC
pub trait PhySapProvider {
    /// Store the allocation for its target slot, merging with an existing one
    fn set_slot_alloc_info(&mut self, info: SlotAllocInfo);

    /// Allocation already stored for `sfn`, if any
    fn slot_alloc_info(&self, sfn: SfnSf) -> Option<&SlotAllocInfo>;

    /// Queue a control message; it goes on air after the L1L2 latency
    fn enqueue_ctrl_message(&mut self, msg: ControlMessage);

    /// Attach a MAC PDU to the data allocation identified by slot, first symbol and RNTI
    fn set_mac_pdu(&mut self, pdu: Bytes, sfn: SfnSf, sym_start: u8, rnti: Rnti);

    fn rb_num(&self) -> u32;

    fn symbols_per_slot(&self) -> u32;

    fn slot_period(&self) -> Duration;

    fn bwp_id(&self) -> BwpId;
}

/// MAC services used by the gNB PHY
pub trait GnbPhySapUser {
    fn set_current_sfn(&mut self, sfn: SfnSf);

    /// Ask the MAC to schedule downlink for the slot `sfn` of type `slot_type`
    fn slot_dl_indication(&mut self, sfn: SfnSf, slot_type: SlotType, phy: &mut dyn PhySapProvider);

    /// Ask the MAC to schedule uplink for the slot `sfn` of type `slot_type`
    fn slot_ul_indication(&mut self, sfn: SfnSf, slot_type: SlotType, phy: &mut dyn PhySapProvider);

    /// Template for the DL control allocation added when MIB/SIB1 must go out
    fn dl_ctrl_dci(&self) -> DciInfo;

    fn ul_ctrl_dci(&self) -> DciInfo;

    /// Symbols taken by the DL control allocation
    fn dl_ctrl_symbols(&self) -> u8;

    fn num_rb_per_rbg(&self) -> u32;

    fn receive_control_message(&mut self, msg: ControlMessage);

    fn receive_rach_preamble(&mut self, rap_id: u32);

    fn ul_harq_feedback(&mut self, info: UlHarqInfo);

    /// A decoded uplink PDU
    fn receive_phy_pdu(&mut self, pdu: Bytes);
}

/// Transmission side of the spectrum model, plus beam control
pub trait SpectrumPhy {
    fn start_tx_data_frames(
        &mut self,
        burst: PacketBurst,
        ctrl_msgs: Vec<ControlMessage>,
        dci: Arc<DciInfo>,
        duration: Duration,
    );

    fn start_tx_dl_control_frames(&mut self, msgs: Vec<ControlMessage>, duration: Duration);

    fn add_expected_tb(&mut self, tb: ExpectedTb);

    fn add_expected_srs_rnti(&mut self, rnti: Rnti);

    /// RBs the next transmission occupies and the PSD scaling applied to them
    fn set_tx_allocation(&mut self, rbs: &[u32], psd_scaling: f64);

    fn start_tx_csi_rs(&mut self, _rnti: Rnti, _beam_id: u16) {}

    /// Point the beam at a UE; `None` when the UE is not registered
    fn change_beamforming_vector(&mut self, _ue: Option<Rnti>) {}

    fn change_to_quasi_omni(&mut self) {}
}

/// Result of a channel access attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Channel obtained for the given duration
    Granted(Duration),
    Denied,
}

/// Answer of the channel access manager to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessResponse {
    /// Outcome known while the request is being made
    Immediate(AccessOutcome),
    /// Outcome delivered after `after` has elapsed
    Deferred { after: Duration, outcome: AccessOutcome },
}

pub trait ChannelAccessManager {
    fn request_access(&mut self) -> AccessResponse;
}

/// How the fronthaul controller enforces its capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FhControlMethod {
    Dropping,
    Postponing,
    OptimizeMcs,
    OptimizeRbs,
}

pub trait FronthaulControl {
    fn control_method(&self) -> FhControlMethod;

    /// Whether `n_regs` resource element groups at `mcs`/`rank` fit the fronthaul
    fn does_allocation_fit(&self, bwp: BwpId, mcs: u8, n_regs: u32, rank: u8) -> bool;

    fn update_traces_based_on_dropped_data(
        &mut self,
        bwp: BwpId,
        mcs: u8,
        n_rbg: u32,
        n_sym: u8,
        rank: u8,
    );

    fn notify_end_slot(&mut self, bwp: BwpId, sfn: SfnSf);
}
