//! CSI-RS offset assignment
//!
//! Each registered UE gets one slot offset inside the CSI-RS period. Offsets
//! only exist for slots that are not UL, and a new UE goes to the least
//! loaded one.

use crate::LayerError;
use common::{Rnti, SlotType, TddPattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Pause between two CSI-RS transmissions of the per-UE model, which also
/// covers the transmission itself
pub const CSI_RS_SPACING: Duration = Duration::from_nanos(2);

/// How CSI-RS is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsiRsModel {
    /// One transmission per UE, each steered to its UE
    #[default]
    PerUe,
    /// One transmission per beam
    PerBeam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiRsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub model: CsiRsModel,
    /// Period in slots; must be a multiple of the pattern length
    #[serde(default = "default_csi_rs_periodicity")]
    pub periodicity: u32,
}

fn default_csi_rs_periodicity() -> u32 {
    10
}

impl Default for CsiRsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: CsiRsModel::default(),
            periodicity: default_csi_rs_periodicity(),
        }
    }
}

/// Slot offset in the CSI-RS period to the UEs measured there
#[derive(Debug, Clone, Default)]
pub struct CsiRsOffsets {
    offsets: BTreeMap<u32, Vec<Rnti>>,
}

impl CsiRsOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `rnti` an offset and return it. The offset table is built on the
    /// first call from `pattern`.
    pub fn assign(
        &mut self,
        pattern: &TddPattern,
        periodicity: u32,
        rnti: Rnti,
    ) -> Result<u32, LayerError> {
        if self.offsets.is_empty() {
            let len = pattern.len() as u32;
            if periodicity == 0 || periodicity % len != 0 {
                return Err(LayerError::InvalidConfiguration(format!(
                    "CSI-RS periodicity {} is not a multiple of the pattern length {}",
                    periodicity, len
                )));
            }
            for round in 0..periodicity / len {
                for (index, slot_type) in pattern.slots().iter().enumerate() {
                    if *slot_type != SlotType::Ul {
                        self.offsets.insert(len * round + index as u32, Vec::new());
                    }
                }
            }
        }

        let mut last_load = match self.offsets.values().next() {
            Some(ues) => ues.len(),
            None => {
                return Err(LayerError::InvalidConfiguration(
                    "no slot of the pattern can carry CSI-RS".to_string(),
                ))
            }
        };

        let mut chosen = None;
        for (offset, ues) in &self.offsets {
            if ues.len() < last_load {
                chosen = Some(*offset);
                break;
            }
            last_load = ues.len();
        }
        // every offset has the same load: start over from the first
        let offset = match chosen.or_else(|| self.offsets.keys().next().copied()) {
            Some(offset) => offset,
            None => return Err(LayerError::InvalidState("empty CSI-RS offset table".to_string())),
        };

        self.offsets.entry(offset).or_default().push(rnti);
        debug!("Assigned CSI-RS offset {} to RNTI {}", offset, rnti);
        Ok(offset)
    }

    /// UEs measured at `offset`
    pub fn ues_at(&self, offset: u32) -> &[Rnti] {
        self.offsets.get(&offset).map_or(&[], Vec::as_slice)
    }

    pub fn is_due(&self, offset: u32) -> bool {
        !self.ues_at(offset).is_empty()
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> TddPattern {
        s.parse().unwrap()
    }

    #[test]
    fn test_round_robin_over_non_ul_slots() {
        let p = pattern("DL|S|UL|UL|DL|");
        let mut csi = CsiRsOffsets::new();
        let assigned: Vec<u32> = (1..=4)
            .map(|r| csi.assign(&p, 5, Rnti(r)).unwrap())
            .collect();
        assert_eq!(assigned, vec![0, 1, 4, 0]);
        assert_eq!(csi.ues_at(0), &[Rnti(1), Rnti(4)]);
        assert!(!csi.is_due(2));
        assert!(csi.is_due(4));
    }

    #[test]
    fn test_period_spans_several_patterns() {
        let p = pattern("DL|UL|");
        let mut csi = CsiRsOffsets::new();
        assert_eq!(csi.assign(&p, 4, Rnti(1)).unwrap(), 0);
        assert_eq!(csi.assign(&p, 4, Rnti(2)).unwrap(), 2);
        assert_eq!(csi.assign(&p, 4, Rnti(3)).unwrap(), 0);
    }

    #[test]
    fn test_period_not_multiple_of_pattern() {
        let p = pattern("DL|UL|F|");
        let mut csi = CsiRsOffsets::new();
        assert!(matches!(
            csi.assign(&p, 10, Rnti(1)),
            Err(LayerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config: CsiRsConfig = serde_json::from_str("{\"enabled\": true}").unwrap();
        assert!(config.enabled);
        assert_eq!(config.model, CsiRsModel::PerUe);
        assert_eq!(config.periodicity, 10);
    }
}
