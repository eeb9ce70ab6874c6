use log::debug;

use crate::error::{MonitorError, Result};
use crate::flow::{
    flow_id, FlowRecord, FlowStatsEntry, IpProtocol, FEATURE_COUNT, FLOW_STATS_HEADER,
    ICMP_SENTINEL, PORT_SENTINEL,
};

/// Columns holding dotted addresses; they are stripped to digits before
/// they become model features.
pub const ADDRESS_COLUMNS: [usize; 3] = [2, 3, 5];

/// Strip the dots from an address-like value. Training rows and live rows
/// both pass through here, so any change applies to both sides at once.
pub fn normalize_ip(value: &str) -> String {
    value.replace('.', "")
}

/// Parse one column value as a model feature, normalizing addresses first.
/// Anything that is not a finite number is rejected so NaN never reaches
/// the classifier.
pub fn numeric_feature(column: usize, value: &str) -> Result<f64> {
    let trimmed = value.trim();
    let normalized;
    let text = if ADDRESS_COLUMNS.contains(&column) {
        normalized = normalize_ip(trimmed);
        normalized.as_str()
    } else {
        trimmed
    };

    let name = FLOW_STATS_HEADER.get(column).copied().unwrap_or("label");
    let parsed: f64 = text.parse().map_err(|_| {
        MonitorError::SchemaError(format!("column '{}' value '{}' is not numeric", name, value))
    })?;
    if !parsed.is_finite() {
        return Err(MonitorError::SchemaError(format!(
            "column '{}' value '{}' is not finite",
            name, value
        )));
    }
    Ok(parsed)
}

/// Rates for one counter: (per second, per nanosecond). Both are zero when
/// either duration is zero, so the pair is never half computed.
pub fn rate_pair(count: u64, duration_sec: u32, duration_nsec: u32) -> (f64, f64) {
    if duration_sec == 0 || duration_nsec == 0 {
        return (0.0, 0.0);
    }
    let count = count as f64;
    (count / duration_sec as f64, count / duration_nsec as f64)
}

/// Turn one raw flow-table entry into a flow record.
pub fn extract_entry(
    datapath_id: u64,
    timestamp: f64,
    entry: &FlowStatsEntry,
) -> Result<FlowRecord> {
    let m = &entry.flow_match;
    let (ip_src, ip_dst, ip_proto) = match (m.ipv4_src, m.ipv4_dst, m.ip_proto) {
        (Some(src), Some(dst), Some(proto)) => (src, dst, proto),
        _ => {
            return Err(MonitorError::ExtractionError(format!(
                "datapath {:016x}: entry without ipv4_src/ipv4_dst/ip_proto",
                datapath_id
            )))
        }
    };

    let mut icmp_code = ICMP_SENTINEL;
    let mut icmp_type = ICMP_SENTINEL;
    let mut tp_src = PORT_SENTINEL;
    let mut tp_dst = PORT_SENTINEL;

    match IpProtocol::from(ip_proto) {
        IpProtocol::Icmp => {
            icmp_code = m.icmpv4_code.map(i32::from).unwrap_or(ICMP_SENTINEL);
            icmp_type = m.icmpv4_type.map(i32::from).unwrap_or(ICMP_SENTINEL);
        }
        IpProtocol::Tcp => {
            tp_src = m.tcp_src.unwrap_or(PORT_SENTINEL);
            tp_dst = m.tcp_dst.unwrap_or(PORT_SENTINEL);
        }
        IpProtocol::Udp => {
            tp_src = m.udp_src.unwrap_or(PORT_SENTINEL);
            tp_dst = m.udp_dst.unwrap_or(PORT_SENTINEL);
        }
        IpProtocol::Other(_) => {}
    }

    let (packets_per_second, packets_per_nsecond) =
        rate_pair(entry.packet_count, entry.duration_sec, entry.duration_nsec);
    let (bytes_per_second, bytes_per_nsecond) =
        rate_pair(entry.byte_count, entry.duration_sec, entry.duration_nsec);

    Ok(FlowRecord {
        timestamp,
        datapath_id,
        flow_id: flow_id(ip_src, tp_src, ip_dst, tp_dst, ip_proto),
        ip_src,
        tp_src,
        ip_dst,
        tp_dst,
        ip_proto,
        icmp_code,
        icmp_type,
        duration_sec: entry.duration_sec,
        duration_nsec: entry.duration_nsec,
        idle_timeout: entry.idle_timeout,
        hard_timeout: entry.hard_timeout,
        flags: entry.flags,
        packet_count: entry.packet_count,
        byte_count: entry.byte_count,
        packets_per_second,
        packets_per_nsecond,
        bytes_per_second,
        bytes_per_nsecond,
    })
}

/// Data-flow entries of a reply in (eth_type, src, dst, proto) order.
/// The sort is stable, so equal keys keep their reply order.
pub fn sorted_data_flows(entries: &[FlowStatsEntry]) -> Vec<&FlowStatsEntry> {
    let mut flows: Vec<&FlowStatsEntry> = entries.iter().filter(|e| e.is_data_flow()).collect();
    flows.sort_by_key(|e| e.sort_key());
    flows
}

/// Extract every data flow of one stats reply. Entries missing mandatory
/// match fields are skipped.
pub fn extract_reply(
    datapath_id: u64,
    timestamp: f64,
    entries: &[FlowStatsEntry],
) -> Vec<FlowRecord> {
    sorted_data_flows(entries)
        .into_iter()
        .filter_map(|entry| match extract_entry(datapath_id, timestamp, entry) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("skipping flow entry: {}", e);
                None
            }
        })
        .collect()
}

impl FlowRecord {
    /// Column values in header order, as written to the snapshot file.
    pub fn columns(&self) -> [String; FEATURE_COUNT] {
        [
            self.timestamp.to_string(),
            self.datapath_id.to_string(),
            self.flow_id.clone(),
            self.ip_src.to_string(),
            self.tp_src.to_string(),
            self.ip_dst.to_string(),
            self.tp_dst.to_string(),
            self.ip_proto.to_string(),
            self.icmp_code.to_string(),
            self.icmp_type.to_string(),
            self.duration_sec.to_string(),
            self.duration_nsec.to_string(),
            self.idle_timeout.to_string(),
            self.hard_timeout.to_string(),
            self.flags.to_string(),
            self.packet_count.to_string(),
            self.byte_count.to_string(),
            self.packets_per_second.to_string(),
            self.packets_per_nsecond.to_string(),
            self.bytes_per_second.to_string(),
            self.bytes_per_nsecond.to_string(),
        ]
    }

    /// Model row for this record, built through the same column parser as
    /// dataset and snapshot files.
    pub fn feature_vector(&self) -> Result<[f64; FEATURE_COUNT]> {
        let columns = self.columns();
        let mut row = [0.0; FEATURE_COUNT];
        for (i, value) in columns.iter().enumerate() {
            row[i] = numeric_feature(i, value)?;
        }
        Ok(row)
    }

    /// Destination address as the integer the model sees.
    pub fn dst_numeric(&self) -> Result<u64> {
        let digits = normalize_ip(&self.ip_dst.to_string());
        Ok(digits.parse::<u64>()?)
    }
}
