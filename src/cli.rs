use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use sdn_flow_monitor::config::MonitorConfig;
use sdn_flow_monitor::error::Result;

#[derive(Debug, Parser)]
#[command(name = "sdn-flow-monitor")]
#[command(about = "Flow-statistics DDoS detection for software-defined networks")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Train the classifier, then poll the simulated network and classify every cycle
    Monitor(MonitorArgs),

    /// Train and evaluate the classifier only
    Train(TrainArgs),

    /// Score a persisted flow snapshot with a freshly trained classifier
    Classify(ClassifyArgs),

    /// Write a labeled training dataset from the simulated network
    Generate(GenerateArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Labeled flow dataset (overrides the config file)
    #[arg(short, long)]
    pub dataset: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::load(path)?,
            None => MonitorConfig::default(),
        };
        if let Some(dataset) = &self.dataset {
            config.training.dataset_path = dataset.clone();
        }
        Ok(config)
    }
}

#[derive(Debug, Parser)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub common: ConfigArgs,

    /// Seconds between polls
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Stop after this many cycles
    #[arg(long)]
    pub cycles: Option<u64>,

    /// Mirror the live snapshot to this CSV file
    #[arg(long)]
    pub snapshot_path: Option<PathBuf>,

    /// Results file reset to header-only after every pass
    #[arg(long)]
    pub results_path: Option<PathBuf>,

    /// Start the simulated flood at this poll cycle
    #[arg(long)]
    pub attack_after: Option<u64>,
}

impl MonitorArgs {
    pub fn config(&self) -> Result<MonitorConfig> {
        let mut config = self.common.load()?;
        if let Some(secs) = self.interval_secs {
            config.monitor.poll_interval_secs = secs;
        }
        if self.cycles.is_some() {
            config.monitor.max_cycles = self.cycles;
        }
        if self.snapshot_path.is_some() {
            config.monitor.snapshot_path = self.snapshot_path.clone();
        }
        if self.results_path.is_some() {
            config.monitor.results_path = self.results_path.clone();
        }
        if self.attack_after.is_some() {
            config.simulation.attack_after_cycle = self.attack_after;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Parser)]
pub struct TrainArgs {
    #[command(flatten)]
    pub common: ConfigArgs,
}

#[derive(Debug, Parser)]
pub struct ClassifyArgs {
    #[command(flatten)]
    pub common: ConfigArgs,

    /// Snapshot CSV written by `monitor --snapshot-path`
    #[arg(short, long)]
    pub snapshot: PathBuf,
}

#[derive(Debug, Parser)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub common: ConfigArgs,

    /// Output CSV
    #[arg(short, long)]
    pub output: PathBuf,

    /// Poll rounds to record
    #[arg(long, default_value_t = 20)]
    pub polls: u64,
}
