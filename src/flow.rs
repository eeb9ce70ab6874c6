use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

/// EtherType for IPv4 frames; every data flow the switch installs matches on it.
pub const ETH_TYPE_IPV4: u16 = 0x0800;

/// Priority the learning switch uses for installed data flows. Table-miss
/// and control entries sit at other priorities.
pub const DATA_FLOW_PRIORITY: u16 = 1;

pub const ICMP_SENTINEL: i32 = -1;
pub const PORT_SENTINEL: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
    Other(u8),
}

impl IpProtocol {
    pub fn number(self) -> u8 {
        match self {
            IpProtocol::Icmp => 1,
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Other(n) => n,
        }
    }
}

impl From<u8> for IpProtocol {
    fn from(value: u8) -> Self {
        match value {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            n => IpProtocol::Other(n),
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
            IpProtocol::Other(n) => write!(f, "IP({})", n),
        }
    }
}

// --- Raw datapath reply ---

/// Match fields of one flow-table entry as reported by the switch.
/// Every field but the EtherType is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowMatch {
    pub eth_type: u16,
    pub ipv4_src: Option<Ipv4Addr>,
    pub ipv4_dst: Option<Ipv4Addr>,
    pub ip_proto: Option<u8>,
    pub icmpv4_code: Option<u8>,
    pub icmpv4_type: Option<u8>,
    pub tcp_src: Option<u16>,
    pub tcp_dst: Option<u16>,
    pub udp_src: Option<u16>,
    pub udp_dst: Option<u16>,
}

/// One entry of a flow-statistics reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowStatsEntry {
    pub priority: u16,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub flags: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    pub flow_match: FlowMatch,
}

impl FlowStatsEntry {
    pub fn is_data_flow(&self) -> bool {
        self.priority == DATA_FLOW_PRIORITY
    }

    /// Ordering key for a reply: (eth_type, src, dst, proto).
    pub fn sort_key(&self) -> (u16, Option<Ipv4Addr>, Option<Ipv4Addr>, Option<u8>) {
        let m = &self.flow_match;
        (m.eth_type, m.ipv4_src, m.ipv4_dst, m.ip_proto)
    }
}

// --- Normalized record ---

/// Number of model features in a flow record row.
pub const FEATURE_COUNT: usize = 21;

/// Column header shared by the live snapshot file, the results file and the
/// training dataset (which adds a trailing label column).
pub const FLOW_STATS_HEADER: [&str; FEATURE_COUNT] = [
    "timestamp",
    "datapath_id",
    "flow_id",
    "ip_src",
    "tp_src",
    "ip_dst",
    "tp_dst",
    "ip_proto",
    "icmp_code",
    "icmp_type",
    "flow_duration_sec",
    "flow_duration_nsec",
    "idle_timeout",
    "hard_timeout",
    "flags",
    "packet_count",
    "byte_count",
    "packet_count_per_second",
    "packet_count_per_nsecond",
    "byte_count_per_second",
    "byte_count_per_nsecond",
];

/// One flow on one datapath at one poll. Field order is the column order,
/// and the serialized field names are [`FLOW_STATS_HEADER`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowRecord {
    pub timestamp: f64,
    pub datapath_id: u64,
    pub flow_id: String,
    pub ip_src: Ipv4Addr,
    pub tp_src: u16,
    pub ip_dst: Ipv4Addr,
    pub tp_dst: u16,
    pub ip_proto: u8,
    pub icmp_code: i32,
    pub icmp_type: i32,
    #[serde(rename = "flow_duration_sec")]
    pub duration_sec: u32,
    #[serde(rename = "flow_duration_nsec")]
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub flags: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    #[serde(rename = "packet_count_per_second")]
    pub packets_per_second: f64,
    #[serde(rename = "packet_count_per_nsecond")]
    pub packets_per_nsecond: f64,
    #[serde(rename = "byte_count_per_second")]
    pub bytes_per_second: f64,
    #[serde(rename = "byte_count_per_nsecond")]
    pub bytes_per_nsecond: f64,
}

impl FlowRecord {
    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from(self.ip_proto)
    }
}

/// Composite flow key: src, sport, dst, dport, proto with no delimiter.
pub fn flow_id(
    ip_src: Ipv4Addr,
    tp_src: u16,
    ip_dst: Ipv4Addr,
    tp_dst: u16,
    ip_proto: u8,
) -> String {
    format!("{}{}{}{}{}", ip_src, tp_src, ip_dst, tp_dst, ip_proto)
}
