//! Common Types for the NR gNB model
//! 
//! Defines fundamental identifiers and enumerations used throughout the stack

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;
use std::str::FromStr;

/// MAC PDUs transmitted together in one data allocation
pub type PacketBurst = Vec<bytes::Bytes>;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// RNTI used by broadcast/control allocations that target no UE
    pub const NONE: Self = Self(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CellId(pub u16);

/// Bandwidth part identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BwpId(pub u16);

/// International Mobile Subscriber Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Imsi(pub u64);

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Subcarrier spacing of a numerology (15 kHz * 2^numerology)
    pub fn from_numerology(numerology: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u32(15u32.checked_shl(numerology as u32)?)
    }

    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    pub fn as_hz(&self) -> u32 {
        num_traits::ToPrimitive::to_u32(self).unwrap_or(15) * 1000
    }
}

/// Duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplexMode {
    /// Frequency Division Duplex
    Fdd,
    /// Time Division Duplex
    Tdd,
}

/// Type of a slot inside a TDD pattern.
///
/// The declaration order is significant: DCI and HARQ offset searches compare
/// slot types by ordinal (`Dl < S < F < Ul`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SlotType {
    /// Downlink only
    Dl = 0,
    /// Special slot (DL, guard and UL symbols)
    S = 1,
    /// Flexible slot, usable in both directions
    F = 2,
    /// Uplink only
    Ul = 3,
}

impl SlotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotType::Dl => "DL",
            SlotType::S => "S",
            SlotType::F => "F",
            SlotType::Ul => "UL",
        }
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DL" => Ok(SlotType::Dl),
            "UL" => Ok(SlotType::Ul),
            "S" => Ok(SlotType::S),
            "F" => Ok(SlotType::F),
            other => Err(other.to_string()),
        }
    }
}
