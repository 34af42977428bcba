//! System Information Block 1 (SIB1) content
//!
//! Builds the SIB1 the primary PHY broadcasts from the cell configuration.

use crate::LayerError;
use common::CellId;
use interfaces::message_types::Sib1;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// PLMN Identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlmnId {
    /// Mobile Country Code (3 digits)
    pub mcc: [u8; 3],
    /// Mobile Network Code (2 or 3 digits)
    pub mnc: Vec<u8>,
}

impl PlmnId {
    /// Create a test PLMN ID (001-01)
    pub fn test_plmn() -> Self {
        Self {
            mcc: [0, 0, 1],
            mnc: vec![0, 1],
        }
    }

    pub fn validate(&self) -> Result<(), LayerError> {
        if !(2..=3).contains(&self.mnc.len()) {
            return Err(LayerError::InvalidConfiguration(format!(
                "MNC must have 2 or 3 digits, got {}",
                self.mnc.len()
            )));
        }
        if self.mcc.iter().chain(&self.mnc).any(|d| *d > 9) {
            return Err(LayerError::InvalidConfiguration(format!(
                "PLMN digits out of range: {:?}-{:?}",
                self.mcc, self.mnc
            )));
        }
        Ok(())
    }

    /// Encode PLMN ID to bytes (3 octets)
    pub fn encode(&self) -> [u8; 3] {
        let mut encoded = [0u8; 3];

        // MCC digit 2 | MCC digit 1
        encoded[0] = (self.mcc[1] << 4) | self.mcc[0];

        // MNC digit 3 | MCC digit 3
        if self.mnc.len() == 3 {
            encoded[1] = (self.mnc[2] << 4) | self.mcc[2];
        } else {
            encoded[1] = (0xF << 4) | self.mcc[2]; // 0xF for 2-digit MNC
        }

        // MNC digit 2 | MNC digit 1
        encoded[2] = (self.mnc[1] << 4) | self.mnc[0];

        encoded
    }

    /// The three encoded octets, most significant first
    pub fn as_u32(&self) -> u32 {
        let [a, b, c] = self.encode();
        u32::from_be_bytes([0, a, b, c])
    }
}

impl Default for PlmnId {
    fn default() -> Self {
        Self::test_plmn()
    }
}

/// SIB1 configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sib1Config {
    #[serde(default)]
    pub plmn: PlmnId,
    /// Tracking area code
    #[serde(default = "default_tac")]
    pub tac: u32,
    #[serde(default)]
    pub csg_indication: bool,
}

fn default_tac() -> u32 {
    1
}

impl Default for Sib1Config {
    fn default() -> Self {
        Self {
            plmn: PlmnId::default(),
            tac: default_tac(),
            csg_indication: false,
        }
    }
}

impl Sib1Config {
    /// SIB1 of cell `cell_id`
    pub fn build(&self, cell_id: CellId) -> Result<Sib1, LayerError> {
        self.plmn.validate()?;
        let sib1 = Sib1 {
            cell_id: cell_id.0,
            plmn_identity: self.plmn.as_u32(),
            tracking_area_code: self.tac,
            csg_indication: self.csg_indication,
        };
        debug!("SIB1 for cell {}: {:?}", cell_id.0, sib1);
        Ok(sib1)
    }
}
