//! In-process stand-in for a switch controller.
//!
//! Models a linear chain of switches with a few hosts each, numbered
//! `h1..hN` at `10.0.0.1..10.0.0.N`. Every stats request is answered at once
//! through the event channel with synthetic flow counters. Once the flood
//! starts, every other host on a switch also sends an ICMP echo flood towards
//! the victim.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use chrono::Utc;
use log::{debug, info};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::config::SimulationConfig;
use crate::controller::{ControllerEvent, DatapathController};
use crate::error::{MonitorError, Result};
use crate::features::extract_entry;
use crate::flow::{FlowMatch, FlowStatsEntry, DATA_FLOW_PRIORITY, ETH_TYPE_IPV4};
use crate::schema::{header_record, ClassLabel, LEGITIMATE_LABEL};

const FLOOD_LABEL: ClassLabel = 1;

const ICMP: u8 = 1;
const TCP: u8 = 6;
const UDP: u8 = 17;
const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;

/// Seconds a simulated flow ages between two polls.
const POLL_AGE_SECS: u32 = 10;

struct SimState {
    rng: StdRng,
    polls: HashMap<u64, u64>,
}

pub struct SimulatedController {
    config: SimulationConfig,
    events: UnboundedSender<ControllerEvent>,
    state: Mutex<SimState>,
}

impl SimulatedController {
    /// Fails when the topology does not fit the `10.0.0.0/24` host plan.
    pub fn new(config: SimulationConfig, events: UnboundedSender<ControllerEvent>) -> Result<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            events,
            state: Mutex::new(SimState {
                rng,
                polls: HashMap::new(),
            }),
        })
    }

    pub fn host_count(&self) -> u8 {
        u8::try_from(self.config.switches)
            .ok()
            .and_then(|switches| switches.checked_mul(self.config.hosts_per_switch))
            .unwrap_or(u8::MAX)
    }

    pub fn host_addr(host: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, host)
    }

    /// Hosts attached to switch `datapath_id` (1-based).
    pub fn hosts_on(&self, datapath_id: u64) -> Vec<u8> {
        if datapath_id == 0 || datapath_id > self.config.switches {
            return Vec::new();
        }
        let per = u64::from(self.config.hosts_per_switch);
        let first = (datapath_id - 1) * per + 1;
        (first..first + per).filter_map(|host| u8::try_from(host).ok()).collect()
    }

    /// Announce every switch as connected.
    pub fn connect_all(&self) -> Result<()> {
        for id in self.list_active_datapaths() {
            self.send(ControllerEvent::DatapathUp(id))?;
        }
        info!(
            "simulated network up: {} switches, {} hosts",
            self.config.switches,
            self.host_count()
        );
        Ok(())
    }

    pub fn disconnect(&self, datapath_id: u64) -> Result<()> {
        self.send(ControllerEvent::DatapathDown(datapath_id))
    }

    fn send(&self, event: ControllerEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| MonitorError::ControllerError("event channel closed".to_string()))
    }

    fn flood_active(&self, poll: u64) -> bool {
        self.config.attack_after_cycle.is_some_and(|start| poll >= start)
    }

    fn build_reply(&self, datapath_id: u64) -> Vec<FlowStatsEntry> {
        self.build_labeled_reply(datapath_id)
            .into_iter()
            .map(|(entry, _)| entry)
            .collect()
    }

    /// Reply entries paired with their ground-truth class.
    fn build_labeled_reply(&self, datapath_id: u64) -> Vec<(FlowStatsEntry, ClassLabel)> {
        let hosts = self.hosts_on(datapath_id);
        let total_hosts = self.host_count().max(2);
        let victim = self.config.victim_host;

        let mut state = self.state.lock();
        let poll = {
            let n = state.polls.entry(datapath_id).or_insert(0);
            *n += 1;
            *n
        };
        let flooding = self.flood_active(poll);
        let rng = &mut state.rng;

        // Table-miss entry, filtered out by the extractor.
        let mut entries = vec![(
            FlowStatsEntry {
                priority: 0,
                duration_sec: poll as u32 * POLL_AGE_SECS,
                packet_count: rng.gen_range(0..20),
                ..Default::default()
            },
            LEGITIMATE_LABEL,
        )];

        for &src in &hosts {
            for _ in 0..2 {
                let mut dst = rng.gen_range(1..=total_hosts);
                if dst == src {
                    dst = dst % total_hosts + 1;
                }
                entries.push((benign_entry(rng, src, dst, poll), LEGITIMATE_LABEL));
            }
            if flooding && src != victim {
                entries.push((flood_entry(rng, src, victim, poll), FLOOD_LABEL));
            }
        }
        entries
    }
}

fn base_entry(rng: &mut StdRng, packets: u64, bytes_per_packet: u64, age: u32) -> FlowStatsEntry {
    FlowStatsEntry {
        priority: DATA_FLOW_PRIORITY,
        duration_sec: age,
        duration_nsec: rng.gen_range(1..1_000_000_000),
        idle_timeout: 20,
        hard_timeout: 100,
        flags: 0,
        packet_count: packets,
        byte_count: packets * bytes_per_packet,
        flow_match: FlowMatch::default(),
    }
}

fn benign_entry(rng: &mut StdRng, src: u8, dst: u8, poll: u64) -> FlowStatsEntry {
    let age = rng.gen_range(1..=poll as u32 * POLL_AGE_SECS);
    let packets = rng.gen_range(1..=u64::from(age) * 5);
    let mut flow_match = FlowMatch {
        eth_type: ETH_TYPE_IPV4,
        ipv4_src: Some(SimulatedController::host_addr(src)),
        ipv4_dst: Some(SimulatedController::host_addr(dst)),
        ..Default::default()
    };

    let mut entry = match rng.gen_range(0..3) {
        0 => {
            flow_match.ip_proto = Some(ICMP);
            flow_match.icmpv4_code = Some(0);
            let echo = if rng.gen_bool(0.5) { ICMP_ECHO_REQUEST } else { ICMP_ECHO_REPLY };
            flow_match.icmpv4_type = Some(echo);
            base_entry(rng, packets, 98, age)
        }
        1 => {
            flow_match.ip_proto = Some(TCP);
            flow_match.tcp_src = Some(rng.gen_range(1024..=65535));
            flow_match.tcp_dst = Some([22, 80, 443][rng.gen_range(0..3)]);
            let size = rng.gen_range(60..1500);
            base_entry(rng, packets, size, age)
        }
        _ => {
            flow_match.ip_proto = Some(UDP);
            flow_match.udp_src = Some(rng.gen_range(1024..=65535));
            flow_match.udp_dst = Some([53, 123, 5001][rng.gen_range(0..3)]);
            let size = rng.gen_range(60..512);
            base_entry(rng, packets, size, age)
        }
    };
    entry.flow_match = flow_match;
    entry
}

fn flood_entry(rng: &mut StdRng, src: u8, victim: u8, poll: u64) -> FlowStatsEntry {
    let age = rng.gen_range(1..=POLL_AGE_SECS);
    let packets = u64::from(age) * rng.gen_range(5_000..20_000) * poll;
    let mut entry = base_entry(rng, packets, 98, age);
    entry.flow_match = FlowMatch {
        eth_type: ETH_TYPE_IPV4,
        ipv4_src: Some(SimulatedController::host_addr(src)),
        ipv4_dst: Some(SimulatedController::host_addr(victim)),
        ip_proto: Some(ICMP),
        icmpv4_code: Some(0),
        icmpv4_type: Some(ICMP_ECHO_REQUEST),
        ..Default::default()
    };
    entry
}

/// Poll every simulated switch `polls` times and write the data flows, with
/// their ground-truth label appended, as a training dataset. The flood runs
/// from the first poll so both classes share the same time range.
pub fn write_labeled_dataset(config: &SimulationConfig, polls: u64, path: &Path) -> Result<usize> {
    let config = SimulationConfig {
        attack_after_cycle: Some(1),
        ..config.clone()
    };
    let (tx, _rx) = mpsc::unbounded_channel();
    let sim = SimulatedController::new(config, tx)?;

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    let mut header = header_record();
    header.push_field("label");
    writer.write_record(&header)?;

    let mut rows = 0;
    for _ in 0..polls {
        for datapath_id in sim.list_active_datapaths() {
            let timestamp = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
            for (entry, label) in sim.build_labeled_reply(datapath_id) {
                if !entry.is_data_flow() {
                    continue;
                }
                let record = extract_entry(datapath_id, timestamp, &entry)?;
                let mut fields = record.columns().to_vec();
                fields.push(label.to_string());
                writer.write_record(&fields)?;
                rows += 1;
            }
        }
    }
    writer.flush()?;
    info!("wrote {} labeled flows to {}", rows, path.display());
    Ok(rows)
}

impl DatapathController for SimulatedController {
    fn list_active_datapaths(&self) -> Vec<u64> {
        (1..=self.config.switches).collect()
    }

    fn request_flow_stats(&self, datapath_id: u64) -> Result<()> {
        if datapath_id == 0 || datapath_id > self.config.switches {
            return Err(MonitorError::ControllerError(format!(
                "unknown datapath {:016x}",
                datapath_id
            )));
        }
        let entries = self.build_reply(datapath_id);
        debug!("simulated reply from {:016x}: {} entries", datapath_id, entries.len());
        self.send(ControllerEvent::FlowStatsReply { datapath_id, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn reply(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> Vec<FlowStatsEntry> {
        match rx.try_recv().unwrap() {
            ControllerEvent::FlowStatsReply { entries, .. } => entries,
            other => panic!("unexpected event {:?}", other),
        }
    }

    fn flood_flows(entries: &[FlowStatsEntry], victim: u8) -> usize {
        entries
            .iter()
            .filter(|e| {
                e.flow_match.icmpv4_type == Some(ICMP_ECHO_REQUEST)
                    && e.flow_match.ipv4_dst == Some(SimulatedController::host_addr(victim))
                    && e.packet_count >= 5_000
            })
            .count()
    }

    #[test]
    fn hosts_are_spread_across_switches() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sim = SimulatedController::new(SimulationConfig::default(), tx).unwrap();
        assert_eq!(sim.host_count(), 18);
        assert_eq!(sim.hosts_on(1), vec![1, 2, 3]);
        assert_eq!(sim.hosts_on(6), vec![16, 17, 18]);
        assert!(sim.hosts_on(7).is_empty());
    }

    #[test]
    fn connect_all_announces_every_switch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sim = SimulatedController::new(SimulationConfig::default(), tx).unwrap();
        sim.connect_all().unwrap();
        let mut ups = Vec::new();
        while let Ok(ControllerEvent::DatapathUp(id)) = rx.try_recv() {
            ups.push(id);
        }
        assert_eq!(ups, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn flood_starts_at_the_configured_poll() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = SimulationConfig {
            attack_after_cycle: Some(2),
            victim_host: 10,
            ..SimulationConfig::default()
        };
        let sim = SimulatedController::new(config, tx).unwrap();

        sim.request_flow_stats(1).unwrap();
        assert_eq!(flood_flows(&reply(&mut rx), 10), 0);

        sim.request_flow_stats(1).unwrap();
        assert_eq!(flood_flows(&reply(&mut rx), 10), 3);
    }

    #[test]
    fn victim_does_not_flood_itself() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = SimulationConfig {
            attack_after_cycle: Some(1),
            victim_host: 10,
            ..SimulationConfig::default()
        };
        let sim = SimulatedController::new(config, tx).unwrap();
        // h10 sits on switch 4 with h11 and h12.
        sim.request_flow_stats(4).unwrap();
        assert_eq!(flood_flows(&reply(&mut rx), 10), 2);
    }

    #[test]
    fn same_seed_same_traffic() {
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = SimulatedController::new(SimulationConfig::default(), tx_a).unwrap();
        let b = SimulatedController::new(SimulationConfig::default(), tx_b).unwrap();
        a.request_flow_stats(3).unwrap();
        b.request_flow_stats(3).unwrap();
        assert_eq!(reply(&mut rx_a), reply(&mut rx_b));
    }

    #[test]
    fn labeled_dataset_loads_with_both_classes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        let rows = write_labeled_dataset(&SimulationConfig::default(), 2, &path).unwrap();
        // 18 hosts x 2 benign flows, 17 flooders, per poll
        assert_eq!(rows, 2 * (36 + 17));

        let dataset = crate::training::load_dataset(&path).unwrap();
        assert_eq!(dataset.len(), rows);
        assert_eq!(dataset.labels.iter().filter(|&&l| l == FLOOD_LABEL).count(), 34);
    }

    #[test]
    fn oversized_topology_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = SimulationConfig {
            switches: 300,
            hosts_per_switch: 1,
            ..SimulationConfig::default()
        };
        assert!(SimulatedController::new(config, tx).is_err());

        let config = SimulationConfig {
            switches: 2,
            hosts_per_switch: 200,
            ..SimulationConfig::default()
        };
        let err = write_labeled_dataset(&config, 1, Path::new("unused.csv")).unwrap_err();
        assert!(matches!(err, MonitorError::ConfigError(_)));
    }

    #[test]
    fn unknown_datapath_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sim = SimulatedController::new(SimulationConfig::default(), tx).unwrap();
        assert!(sim.request_flow_stats(0).is_err());
        assert!(sim.request_flow_stats(42).is_err());
    }
}
