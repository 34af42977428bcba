//! NR gNB PHY simulation
//!
//! Runs the gNB PHY slot engine with the reference MAC for a given stretch
//! of simulated time and prints what happened.

mod config;

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::Utc;
use clap::Parser;
use common::{DciInfo, PacketBurst, Rnti};
use config::{ChannelAccessConfig, SimConfig};
use interfaces::message_types::{ControlMessage, ExpectedTb};
use interfaces::sap::{ChannelAccessManager, SpectrumPhy};
use interfaces::trace::{JsonLinesTraceSink, NullTraceSink, PhyTraceSink};
use layers::mac::{MacStats, SimpleGnbMac};
use layers::phy::{AlwaysOnAccessManager, GnbPhy, PhyCounters, ProbabilisticAccessManager};
use layers::sim::{RunSummary, Simulator};
use serde::Serialize;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// NR gNB PHY slot-timing simulation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (.yml, .yaml or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated time to run, overrides the configuration file
    #[arg(short, long)]
    duration_ms: Option<u64>,

    /// Write slot statistics and control message traces here, one JSON object per line
    #[arg(short, long)]
    trace_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Spectrum model that only logs what the PHY transmits
#[derive(Debug, Default)]
struct LoggingSpectrumPhy {
    beam: Option<Rnti>,
}

impl SpectrumPhy for LoggingSpectrumPhy {
    fn start_tx_data_frames(
        &mut self,
        burst: PacketBurst,
        _ctrl_msgs: Vec<ControlMessage>,
        dci: Arc<DciInfo>,
        duration: Duration,
    ) {
        let bytes: usize = burst.iter().map(Bytes::len).sum();
        debug!("TX data for RNTI {}: {} bytes over {:?} (beam {:?})", dci.rnti, bytes, duration, self.beam);
    }

    fn start_tx_dl_control_frames(&mut self, msgs: Vec<ControlMessage>, duration: Duration) {
        debug!("TX {} control messages over {:?}", msgs.len(), duration);
    }

    fn add_expected_tb(&mut self, tb: ExpectedTb) {
        trace!("Expecting {:?}", tb);
    }

    fn add_expected_srs_rnti(&mut self, rnti: Rnti) {
        trace!("Expecting SRS from RNTI {}", rnti);
    }

    fn set_tx_allocation(&mut self, rbs: &[u32], psd_scaling: f64) {
        trace!("TX on {} RBs, PSD scaling {:.3}", rbs.len(), psd_scaling);
    }

    fn change_beamforming_vector(&mut self, ue: Option<Rnti>) {
        self.beam = ue;
    }

    fn change_to_quasi_omni(&mut self) {
        self.beam = None;
    }
}

/// What a run did
#[derive(Debug, Serialize)]
struct RunReport {
    started_at: String,
    summary: RunSummary,
    phy: PhyCounters,
    mac: MacStats,
}

fn channel_access_manager(config: &ChannelAccessConfig) -> Box<dyn ChannelAccessManager> {
    match *config {
        ChannelAccessConfig::AlwaysOn { grant_ms } => {
            Box::new(AlwaysOnAccessManager::new(Duration::from_millis(grant_ms)))
        }
        ChannelAccessConfig::Probabilistic { seed, busy_probability, max_backoff_us, occupancy_ms } => {
            Box::new(ProbabilisticAccessManager::new(
                seed,
                busy_probability,
                Duration::from_micros(max_backoff_us),
                Duration::from_millis(occupancy_ms),
            ))
        }
    }
}

fn trace_sink(path: Option<&PathBuf>) -> Result<Box<dyn PhyTraceSink>> {
    Ok(match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating trace file {}", path.display()))?;
            info!("Writing traces to {}", path.display());
            Box::new(JsonLinesTraceSink::new(file))
        }
        None => Box::new(NullTraceSink),
    })
}

/// Build the PHY and its MAC, then run until the configured time or `stop`
fn run_simulation(config: &SimConfig, trace_file: Option<&PathBuf>, stop: &AtomicBool) -> Result<RunReport> {
    config.validate()?;
    let started_at = Utc::now().to_rfc3339();

    let frame = config.phy.frame_structure()?;
    let mut mac = SimpleGnbMac::new(config.mac.clone(), frame.rb_num(), config.phy.symbols_per_slot)?;
    for ue in &config.ues {
        mac.add_ue(Rnti(ue.rnti), ue.traffic);
    }
    let mac_stats = mac.stats();

    let mut phy = GnbPhy::new(
        config.phy.clone(),
        Box::new(mac),
        Box::new(LoggingSpectrumPhy::default()),
        channel_access_manager(&config.channel_access),
        trace_sink(trace_file)?,
    )?;
    phy.set_sib1(config.cell.sib1_config()?.build(config.phy.cell_id)?);
    for ue in &config.ues {
        let (imsi, rnti) = ue.ids();
        if !phy.register_ue(imsi, rnti)? {
            warn!("UE {:?} already registered", imsi);
        }
        phy.add_ue(rnti);
    }

    let mut sim = Simulator::new(phy);
    sim.handler.start_event_loop(&mut sim.queue, 0, 0, 0);
    let summary = sim.run(config.duration(), Some(stop))?;
    sim.handler.finish()?;

    Ok(RunReport {
        started_at,
        summary,
        phy: sim.handler.counters().clone(),
        mac: mac_stats.snapshot(),
    })
}

/// Run on a blocking worker; ctrl-c stops the run at the next event
async fn run(config: SimConfig, trace_file: Option<PathBuf>) -> Result<RunReport> {
    let stop = Arc::new(AtomicBool::new(false));
    let mut task = tokio::task::spawn_blocking({
        let stop = stop.clone();
        move || run_simulation(&config, trace_file.as_ref(), &stop)
    });

    tokio::select! {
        joined = &mut task => joined.context("simulation task failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            stop.store(true, Ordering::Relaxed);
            task.await.context("simulation task failed")?
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            info!("Configuration file: {}", path.display());
            SimConfig::from_file(path)?
        }
        None => SimConfig::default(),
    };
    if let Some(duration_ms) = args.duration_ms {
        config.duration_ms = duration_ms;
    }
    info!(
        "Simulating {} ms, numerology {}, pattern {}, {} UEs",
        config.duration_ms,
        config.phy.numerology,
        config.phy.pattern,
        config.ues.len()
    );

    let report = run(config, args.trace_file).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
