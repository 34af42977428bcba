//! Physical Layer (PHY) Submodules
//!
//! Slot-level model of the gNB PHY: timing derived from the slot pattern,
//! the allocation store, the control message pipeline, channel access and
//! the engine that runs every slot.

pub mod channel_access;
pub mod csi_rs;
pub mod ctrl_queue;
pub mod frame_structure;
pub mod gnb_phy;
pub mod rbg;
pub mod slot_alloc_store;
pub mod slot_timing;

// Re-export commonly used types
pub use channel_access::{
    AlwaysOnAccessManager, ChannelAccessCoordinator, ChannelStatus, ProbabilisticAccessManager,
};
pub use csi_rs::{CsiRsConfig, CsiRsModel};
pub use ctrl_queue::ControlMessageQueue;
pub use frame_structure::{FrameStructure, SlotConfig};
pub use gnb_phy::{GnbPhy, PhyCounters, PhyEvent, PhySapHandle};
pub use rbg::{rbg_bitmask_to_rb_assignment, RbgAllocator};
pub use slot_alloc_store::SlotAllocationStore;
pub use slot_timing::{DciMaps, ProcessingDelays, L1L2_CTRL_LATENCY};

use crate::LayerError;
use common::{BwpId, CellId, TddPattern};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the transmit power is spread over the RBs of a data transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAllocationType {
    /// Power split over the RBs actually used in the symbol
    #[default]
    UniformPowerAllocationUsed,
    /// Power split over the whole bandwidth
    UniformPowerAllocationBw,
}

/// PHY layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhyConfig {
    #[serde(default)]
    pub numerology: u8,
    #[serde(default = "default_symbols_per_slot")]
    pub symbols_per_slot: u8,
    /// Channel bandwidth in Hz
    #[serde(default = "default_channel_bandwidth")]
    pub channel_bandwidth_hz: u64,
    /// Share of the bandwidth not usable for RBs
    #[serde(default = "default_rb_overhead")]
    pub rb_overhead: f64,
    #[serde(default)]
    pub pattern: TddPattern,
    /// DL grant to data delay, slots
    #[serde(default)]
    pub n0: u32,
    /// DL data to HARQ feedback delay, slots
    #[serde(default = "default_n1")]
    pub n1: u32,
    /// UL grant to data delay, slots
    #[serde(default = "default_n2")]
    pub n2: u32,
    #[serde(default = "default_tb_decode_latency_us")]
    pub tb_decode_latency_us: u64,
    #[serde(default)]
    pub bwp_id: BwpId,
    #[serde(default)]
    pub cell_id: CellId,
    /// The primary PHY of a cell broadcasts MIB and SIB1
    #[serde(default = "default_primary")]
    pub primary: bool,
    #[serde(default)]
    pub power_allocation: PowerAllocationType,
    #[serde(default)]
    pub csi_rs: CsiRsConfig,
}

fn default_symbols_per_slot() -> u8 {
    frame_structure::SYMBOLS_PER_SLOT_NORMAL_CP
}

fn default_channel_bandwidth() -> u64 {
    20_000_000
}

fn default_rb_overhead() -> f64 {
    0.04
}

fn default_n1() -> u32 {
    2
}

fn default_n2() -> u32 {
    2
}

fn default_tb_decode_latency_us() -> u64 {
    100
}

fn default_primary() -> bool {
    true
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            numerology: 0,
            symbols_per_slot: default_symbols_per_slot(),
            channel_bandwidth_hz: default_channel_bandwidth(),
            rb_overhead: default_rb_overhead(),
            pattern: TddPattern::default(),
            n0: 0,
            n1: default_n1(),
            n2: default_n2(),
            tb_decode_latency_us: default_tb_decode_latency_us(),
            bwp_id: BwpId::default(),
            cell_id: CellId::default(),
            primary: default_primary(),
            power_allocation: PowerAllocationType::default(),
            csi_rs: CsiRsConfig::default(),
        }
    }
}

impl PhyConfig {
    pub fn delays(&self) -> ProcessingDelays {
        ProcessingDelays {
            n0: self.n0,
            n1: self.n1,
            n2: self.n2,
            l1l2_ctrl_latency: L1L2_CTRL_LATENCY,
        }
    }

    pub fn tb_decode_latency(&self) -> Duration {
        Duration::from_micros(self.tb_decode_latency_us)
    }

    pub fn frame_structure(&self) -> Result<FrameStructure, LayerError> {
        FrameStructure::new(
            self.numerology,
            self.symbols_per_slot,
            self.channel_bandwidth_hz,
            self.rb_overhead,
        )
    }

    /// Check every bound; the error names the first offending value
    pub fn validate(&self) -> Result<(), LayerError> {
        if !(0.0..1.0).contains(&self.rb_overhead) {
            return Err(LayerError::InvalidConfiguration(format!(
                "RB overhead {} out of range [0, 1)", self.rb_overhead
            )));
        }
        self.frame_structure()?;
        self.delays().validate()?;

        if self.csi_rs.enabled {
            let len = self.pattern.len() as u32;
            if self.csi_rs.periodicity == 0 || self.csi_rs.periodicity % len != 0 {
                return Err(LayerError::InvalidConfiguration(format!(
                    "CSI-RS periodicity {} is not a multiple of the pattern length {}",
                    self.csi_rs.periodicity, len
                )));
            }
        }
        Ok(())
    }
}
