//! Common Utilities
//! 
//! Provides slot arithmetic and numerology helpers used across the model

use thiserror::Error;
use tracing::trace;

/// Subcarriers in one resource block
pub const SUBCARRIERS_PER_RB: u32 = 12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumerologyError {
    #[error("Numerology {0} is not supported (0-4)")]
    UnsupportedNumerology(u8),

    #[error("Channel bandwidth not set")]
    BandwidthNotSet,

    #[error("Bandwidth after overhead is {real_bw_hz} Hz, narrower than one RB of {rb_width_hz} Hz")]
    BandwidthTooNarrow { real_bw_hz: f64, rb_width_hz: u32 },
}

/// `n mod m`, always in `[0, m)` even for negative `n`
pub fn modulo(n: i64, m: usize) -> usize {
    n.rem_euclid(m as i64) as usize
}

/// Number of resource blocks that fit in the usable part of the channel
pub fn calculate_nrb(bandwidth_hz: u64, scs_hz: u32, overhead: f64) -> Result<u32, NumerologyError> {
    if bandwidth_hz == 0 {
        return Err(NumerologyError::BandwidthNotSet);
    }

    let real_bw_hz = bandwidth_hz as f64 * (1.0 - overhead);
    let rb_width_hz = scs_hz * SUBCARRIERS_PER_RB;
    if rb_width_hz as f64 > real_bw_hz {
        return Err(NumerologyError::BandwidthTooNarrow { real_bw_hz, rb_width_hz });
    }

    let nrb = (real_bw_hz / rb_width_hz as f64) as u32;
    trace!("Calculated {} RBs for {}Hz bandwidth with {}Hz SCS", nrb, bandwidth_hz, scs_hz);
    Ok(nrb)
}

/// Time utilities for slot/frame calculations
pub mod time {
    use super::NumerologyError;
    use std::time::Duration;

    /// Highest numerology supported by the model
    pub const MAX_NUMEROLOGY: u8 = 4;

    pub fn check_numerology(numerology: u8) -> Result<(), NumerologyError> {
        if numerology > MAX_NUMEROLOGY {
            return Err(NumerologyError::UnsupportedNumerology(numerology));
        }
        Ok(())
    }

    /// Slots in one 1 ms subframe
    pub fn slots_per_subframe(numerology: u8) -> u32 {
        1 << numerology
    }

    /// Number of slots per frame (10ms)
    pub fn slots_per_frame(numerology: u8) -> u32 {
        10 * slots_per_subframe(numerology)
    }

    /// Slot duration: 1 ms / 2^numerology
    pub fn slot_period(numerology: u8) -> Duration {
        Duration::from_nanos(1_000_000 >> numerology)
    }

    pub fn symbol_period(numerology: u8, symbols_per_slot: u32) -> Duration {
        slot_period(numerology) / symbols_per_slot
    }

    /// Subcarrier spacing in Hz: 15 kHz * 2^numerology
    pub fn subcarrier_spacing_hz(numerology: u8) -> u32 {
        15_000 << numerology
    }
}
