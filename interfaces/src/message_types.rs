//! Control Message Types
//! 
//! Defines the control messages carried on the PDCCH/PUCCH between gNB and UE

use common::{BwpId, DciInfo, Rnti, SfnSf};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Control message kinds. The declaration order is the order in which
/// messages of one slot are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    /// Master information block
    Mib,
    /// System information block 1
    Sib1,
    /// Random access response
    Rar,
    /// Downlink grant
    DlDci,
    /// Uplink grant
    UlDci,
    /// Downlink channel quality report
    DlCqi,
    /// Downlink HARQ feedback
    DlHarq,
    /// Buffer status report
    Bsr,
    /// Scheduling request
    Sr,
    /// Random access preamble
    RachPreamble,
    /// Sounding reference signal indication
    Srs,
}

/// Master information block content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mib {
    pub numerology: u8,
    /// Downlink bandwidth in units of 100 kHz
    pub dl_bandwidth: u32,
    pub system_frame_number: u32,
}

/// System information block 1 content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sib1 {
    pub cell_id: u16,
    pub plmn_identity: u32,
    pub tracking_area_code: u32,
    pub csg_indication: bool,
}

/// One entry of a random access response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rar {
    pub ra_preamble_id: u8,
    pub ul_msg3_dci: Arc<DciInfo>,
    pub k2_delay: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlCqiInfo {
    pub rnti: Rnti,
    pub rank: u8,
    pub wideband_cqi: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlHarqInfo {
    pub rnti: Rnti,
    pub harq_process: u8,
    pub ack: bool,
    pub num_retx: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UlHarqInfo {
    pub rnti: Rnti,
    pub harq_process: u8,
    pub received_ok: bool,
    pub num_retx: u8,
}

/// Message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlPayload {
    Mib(Mib),
    Sib1(Sib1),
    Rar(Vec<Rar>),
    DlDci { dci: Arc<DciInfo>, k_delay: u32, k1_delay: u32 },
    UlDci { dci: Arc<DciInfo>, k_delay: u32 },
    DlCqi(DlCqiInfo),
    DlHarq(DlHarqInfo),
    Bsr { rnti: Rnti, buffer_bytes: u32 },
    Sr { rnti: Rnti },
    RachPreamble { rap_id: u32 },
    Srs { rnti: Rnti },
}

/// Control message tagged with the bandwidth part it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub source_bwp: BwpId,
    pub payload: ControlPayload,
}

impl ControlMessage {
    pub fn new(source_bwp: BwpId, payload: ControlPayload) -> Self {
        Self { source_bwp, payload }
    }

    pub fn message_type(&self) -> MessageType {
        match &self.payload {
            ControlPayload::Mib(_) => MessageType::Mib,
            ControlPayload::Sib1(_) => MessageType::Sib1,
            ControlPayload::Rar(_) => MessageType::Rar,
            ControlPayload::DlDci { .. } => MessageType::DlDci,
            ControlPayload::UlDci { .. } => MessageType::UlDci,
            ControlPayload::DlCqi(_) => MessageType::DlCqi,
            ControlPayload::DlHarq(_) => MessageType::DlHarq,
            ControlPayload::Bsr { .. } => MessageType::Bsr,
            ControlPayload::Sr { .. } => MessageType::Sr,
            ControlPayload::RachPreamble { .. } => MessageType::RachPreamble,
            ControlPayload::Srs { .. } => MessageType::Srs,
        }
    }

    /// RNTI the message is about, `Rnti::NONE` for broadcast messages
    pub fn rnti(&self) -> Rnti {
        match &self.payload {
            ControlPayload::DlDci { dci, .. } | ControlPayload::UlDci { dci, .. } => dci.rnti,
            ControlPayload::DlCqi(cqi) => cqi.rnti,
            ControlPayload::DlHarq(harq) => harq.rnti,
            ControlPayload::Bsr { rnti, .. }
            | ControlPayload::Sr { rnti }
            | ControlPayload::Srs { rnti } => *rnti,
            _ => Rnti::NONE,
        }
    }
}

/// Transport block the spectrum layer must expect in an uplink allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedTb {
    pub ndi: u8,
    pub tb_size: u32,
    pub mcs: u8,
    pub rank: u8,
    pub rnti: Rnti,
    pub rb_assignment: Vec<u32>,
    pub harq_process: u8,
    pub rv: u8,
    pub is_downlink: bool,
    pub sym_start: u8,
    pub num_sym: u8,
    pub sfn: SfnSf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{DciFormat, VarTtiType};

    #[test]
    fn test_message_type_and_rnti() {
        let dci = Arc::new(DciInfo::new(
            Rnti(7),
            DciFormat::Ul,
            VarTtiType::Data,
            2,
            4,
            vec![true],
        ));
        let msg = ControlMessage::new(BwpId(0), ControlPayload::UlDci { dci, k_delay: 2 });
        assert_eq!(msg.message_type(), MessageType::UlDci);
        assert_eq!(msg.rnti(), Rnti(7));

        let mib = ControlMessage::new(
            BwpId(0),
            ControlPayload::Mib(Mib { numerology: 1, dl_bandwidth: 200, system_frame_number: 1 }),
        );
        assert_eq!(mib.rnti(), Rnti::NONE);
        assert!(mib.message_type() < msg.message_type());
    }

    #[test]
    fn test_message_serializes() {
        let msg = ControlMessage::new(BwpId(1), ControlPayload::Sr { rnti: Rnti(3) });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"Sr\""));
    }
}
