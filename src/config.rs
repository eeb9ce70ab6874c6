use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::forest::ForestParams;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub training: TrainingConfig,
    pub detection: DetectionConfig,
    pub monitor: LoopConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub dataset_path: PathBuf,
    /// Share of the dataset held out for the confusion matrix.
    pub test_fraction: f64,
    pub forest: ForestParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("flow_dataset.csv"),
            test_fraction: 0.25,
            forest: ForestParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// A pass is legitimate when strictly more than this share of flows is.
    pub legitimate_threshold: f64,
    /// Modulus applied to the numeric destination address to name a host.
    pub host_count: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            legitimate_threshold: 0.80,
            host_count: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub poll_interval_secs: u64,
    /// Stop after this many cycles; run until shutdown when unset.
    pub max_cycles: Option<u64>,
    /// CSV mirror of the live snapshot.
    pub snapshot_path: Option<PathBuf>,
    /// Decision table reset to header-only after every pass.
    pub results_path: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            max_cycles: None,
            snapshot_path: None,
            results_path: None,
        }
    }
}

impl LoopConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub switches: u64,
    pub hosts_per_switch: u8,
    /// First cycle in which the flood starts; no flood when unset.
    pub attack_after_cycle: Option<u64>,
    pub victim_host: u8,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            switches: 6,
            hosts_per_switch: 3,
            attack_after_cycle: None,
            victim_host: 10,
            seed: 7,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file. Missing sections take defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            MonitorError::ConfigError(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let config: MonitorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        if !(t.test_fraction > 0.0 && t.test_fraction < 1.0) {
            return Err(format!("test_fraction must be in (0, 1), got {}", t.test_fraction).into());
        }
        if t.forest.n_trees == 0 {
            return Err("forest.n_trees must be at least 1".into());
        }
        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.legitimate_threshold) {
            return Err(format!(
                "legitimate_threshold must be in [0, 1], got {}",
                d.legitimate_threshold
            )
            .into());
        }
        if d.host_count == 0 {
            return Err("host_count must be at least 1".into());
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err("poll_interval_secs must be at least 1".into());
        }
        self.simulation.validate()
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.switches == 0 || self.hosts_per_switch == 0 {
            return Err("simulation needs at least one switch and one host".into());
        }
        if u64::from(self.hosts_per_switch).saturating_mul(self.switches) > 254 {
            return Err("simulated hosts must fit in one /24".into());
        }
        Ok(())
    }
}
