//! TDD slot patterns
//!
//! A pattern is written as pipe separated slot types, e.g. `"DL|S|UL|UL|F|"`.

use crate::types::{DuplexMode, SlotType};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Pattern is empty")]
    Empty,

    #[error("Pattern token {0:?} is not valid; use DL, UL, S or F")]
    InvalidToken(String),
}

/// Ordered, fixed-length sequence of slot types. Indexing wraps on the length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TddPattern {
    slots: Vec<SlotType>,
}

impl TddPattern {
    pub fn new(slots: Vec<SlotType>) -> Result<Self, PatternError> {
        if slots.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self { slots })
    }

    /// Pattern with `len` flexible slots
    pub fn all_flexible(len: usize) -> Self {
        Self { slots: vec![SlotType::F; len.max(1)] }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot type at `index`, wrapping on the pattern length
    pub fn get(&self, index: usize) -> SlotType {
        self.slots[index % self.slots.len()]
    }

    pub fn slots(&self) -> &[SlotType] {
        &self.slots
    }

    fn contains(&self, ty: SlotType) -> bool {
        self.slots.contains(&ty)
    }

    /// A pattern is TDD if it has a flexible slot, or it mixes UL and DL.
    /// An all-DL or all-UL pattern describes one direction of an FDD pair.
    pub fn is_tdd(&self) -> bool {
        if self.contains(SlotType::F) {
            return true;
        }
        let any_ul = self.contains(SlotType::Ul);
        let any_dl = self.contains(SlotType::Dl);
        !(any_ul ^ any_dl)
    }

    pub fn duplex_mode(&self) -> DuplexMode {
        if self.is_tdd() {
            DuplexMode::Tdd
        } else {
            DuplexMode::Fdd
        }
    }

    /// True if some slot can carry downlink
    pub fn has_dl_slot(&self) -> bool {
        self.slots
            .iter()
            .any(|s| matches!(s, SlotType::F | SlotType::Dl | SlotType::S))
    }

    /// True if some slot can carry uplink
    pub fn has_ul_slot(&self) -> bool {
        self.slots
            .iter()
            .any(|s| matches!(s, SlotType::F | SlotType::Ul | SlotType::S))
    }
}

impl Default for TddPattern {
    fn default() -> Self {
        Self::all_flexible(10)
    }
}

impl FromStr for TddPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_suffix('|').unwrap_or(s);
        if s.is_empty() {
            return Err(PatternError::Empty);
        }
        let slots = s
            .split('|')
            .map(|t| match t.trim() {
                "" => Err(PatternError::InvalidToken(String::new())),
                t => t.parse::<SlotType>().map_err(PatternError::InvalidToken),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(slots)
    }
}

impl fmt::Display for TddPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for slot in &self.slots {
            write!(f, "{}|", slot)?;
        }
        Ok(())
    }
}

impl Serialize for TddPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TddPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
