//! Simulation configuration file
//!
//! YAML or TOML, chosen by file extension. Every section is optional.

use anyhow::{bail, Context};
use common::{Imsi, Rnti};
use layers::mac::{MacConfig, PlmnId, Sib1Config, TrafficProfile};
use layers::phy::PhyConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    #[serde(default)]
    pub phy: PhyConfig,
    #[serde(default)]
    pub mac: MacConfig,
    #[serde(default)]
    pub cell: CellConfig,
    /// UEs registered before the first slot
    #[serde(default)]
    pub ues: Vec<UeConfig>,
    #[serde(default)]
    pub channel_access: ChannelAccessConfig,
    /// Simulated time to run
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
}

fn default_duration_ms() -> u64 {
    1000
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            phy: PhyConfig::default(),
            mac: MacConfig::default(),
            cell: CellConfig::default(),
            ues: Vec::new(),
            channel_access: ChannelAccessConfig::default(),
            duration_ms: default_duration_ms(),
        }
    }
}

/// Cell broadcast content
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// PLMN ID (MCC+MNC), e.g. "00101"
    #[serde(default = "default_plmn")]
    pub plmn: String,
    /// Tracking area code
    #[serde(default = "default_tac")]
    pub tac: u32,
    #[serde(default)]
    pub csg_indication: bool,
}

fn default_plmn() -> String {
    "00101".to_string()
}

fn default_tac() -> u32 {
    1
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            plmn: default_plmn(),
            tac: default_tac(),
            csg_indication: false,
        }
    }
}

impl CellConfig {
    pub fn sib1_config(&self) -> anyhow::Result<Sib1Config> {
        Ok(Sib1Config {
            plmn: parse_plmn(&self.plmn)?,
            tac: self.tac,
            csg_indication: self.csg_indication,
        })
    }
}

/// A UE attached from the start
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeConfig {
    pub imsi: u64,
    pub rnti: u16,
    #[serde(default)]
    pub traffic: TrafficProfile,
}

impl UeConfig {
    pub fn ids(&self) -> (Imsi, Rnti) {
        (Imsi(self.imsi), Rnti(self.rnti))
    }
}

/// Channel access model
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelAccessConfig {
    /// Licensed spectrum: every request is granted at once
    AlwaysOn {
        #[serde(default = "default_grant_ms")]
        grant_ms: u64,
    },
    /// Listen-before-talk approximation with a seeded RNG
    Probabilistic {
        #[serde(default)]
        seed: u64,
        busy_probability: f64,
        #[serde(default = "default_max_backoff_us")]
        max_backoff_us: u64,
        #[serde(default = "default_occupancy_ms")]
        occupancy_ms: u64,
    },
}

fn default_grant_ms() -> u64 {
    1000
}

fn default_max_backoff_us() -> u64 {
    100
}

fn default_occupancy_ms() -> u64 {
    8
}

impl Default for ChannelAccessConfig {
    fn default() -> Self {
        Self::AlwaysOn { grant_ms: default_grant_ms() }
    }
}

impl SimConfig {
    /// Load a `.yml`/`.yaml` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yml" | "yaml") => Self::from_yaml_str(&contents),
            Some("toml") => Self::from_toml_str(&contents),
            _ => bail!("Unknown configuration format: {}", path.display()),
        };
        config.with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Check what the layers do not check themselves
    pub fn validate(&self) -> anyhow::Result<()> {
        self.phy.validate().context("invalid PHY configuration")?;
        self.cell.sib1_config()?;

        if let ChannelAccessConfig::Probabilistic { busy_probability, .. } = self.channel_access {
            if !(0.0..=1.0).contains(&busy_probability) {
                bail!("Busy probability {} out of range [0, 1]", busy_probability);
            }
        }

        for (i, ue) in self.ues.iter().enumerate() {
            if Rnti(ue.rnti).is_none() {
                bail!("UE {} has no RNTI", ue.imsi);
            }
            if self.ues[..i].iter().any(|other| other.imsi == ue.imsi || other.rnti == ue.rnti) {
                bail!("UE {} (RNTI {}) is configured twice", ue.imsi, ue.rnti);
            }
        }
        Ok(())
    }
}

/// Parse PLMN string (e.g., "00101") into MCC and MNC digits
pub fn parse_plmn(plmn: &str) -> anyhow::Result<PlmnId> {
    if !(5..=6).contains(&plmn.len()) {
        bail!("Invalid PLMN format: {}", plmn);
    }
    let digits = plmn
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>()
        .with_context(|| format!("Invalid PLMN format: {}", plmn))?;

    Ok(PlmnId {
        mcc: [digits[0], digits[1], digits[2]],
        mnc: digits[3..].to_vec(),
    })
}
