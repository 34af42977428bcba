//! 5G NR Frame Structure
//!
//! Slot and symbol timing plus the RB count of a bandwidth part, derived from
//! its numerology.

use crate::LayerError;
use common::time::{check_numerology, slot_period, slots_per_frame, slots_per_subframe};
use common::{calculate_nrb, SubcarrierSpacing};
use std::time::Duration;

/// Normal cyclic prefix symbols per slot
pub const SYMBOLS_PER_SLOT_NORMAL_CP: u8 = 14;

/// Timing of one numerology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    pub scs: SubcarrierSpacing,
    /// Number of slots per subframe (1ms)
    pub slots_per_subframe: u32,
    /// Number of slots per frame (10ms)
    pub slots_per_frame: u32,
    pub symbols_per_slot: u8,
    pub slot_period: Duration,
    pub symbol_period: Duration,
}

impl SlotConfig {
    pub fn from_numerology(numerology: u8, symbols_per_slot: u8) -> Result<Self, LayerError> {
        check_numerology(numerology)?;
        if symbols_per_slot == 0 || symbols_per_slot > SYMBOLS_PER_SLOT_NORMAL_CP {
            return Err(LayerError::InvalidConfiguration(format!(
                "{} symbols per slot, expected 1-{}",
                symbols_per_slot, SYMBOLS_PER_SLOT_NORMAL_CP
            )));
        }
        let scs = SubcarrierSpacing::from_numerology(numerology)
            .ok_or(common::NumerologyError::UnsupportedNumerology(numerology))?;
        let slot_period = slot_period(numerology);

        Ok(Self {
            scs,
            slots_per_subframe: slots_per_subframe(numerology),
            slots_per_frame: slots_per_frame(numerology),
            symbols_per_slot,
            slot_period,
            symbol_period: slot_period / symbols_per_slot as u32,
        })
    }
}

/// Frame structure of the bandwidth part the PHY runs on
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStructure {
    numerology: u8,
    slot_config: SlotConfig,
    channel_bandwidth_hz: u64,
    rb_num: u32,
}

impl FrameStructure {
    pub fn new(
        numerology: u8,
        symbols_per_slot: u8,
        channel_bandwidth_hz: u64,
        rb_overhead: f64,
    ) -> Result<Self, LayerError> {
        let slot_config = SlotConfig::from_numerology(numerology, symbols_per_slot)?;
        let rb_num = calculate_nrb(channel_bandwidth_hz, slot_config.scs.as_hz(), rb_overhead)?;
        Ok(Self { numerology, slot_config, channel_bandwidth_hz, rb_num })
    }

    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    pub fn slot_config(&self) -> &SlotConfig {
        &self.slot_config
    }

    pub fn slot_period(&self) -> Duration {
        self.slot_config.slot_period
    }

    pub fn symbol_period(&self) -> Duration {
        self.slot_config.symbol_period
    }

    pub fn symbols_per_slot(&self) -> u8 {
        self.slot_config.symbols_per_slot
    }

    pub fn slots_per_frame(&self) -> u32 {
        self.slot_config.slots_per_frame
    }

    pub fn channel_bandwidth_hz(&self) -> u64 {
        self.channel_bandwidth_hz
    }

    pub fn rb_num(&self) -> u32 {
        self.rb_num
    }

    /// DL bandwidth as carried in the MIB, in units of 100 kHz
    pub fn mib_dl_bandwidth(&self) -> u32 {
        (self.channel_bandwidth_hz / 100_000) as u32
    }
}
