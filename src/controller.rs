use crate::error::Result;
use crate::flow::FlowStatsEntry;

/// Outbound side of the switch controller.
pub trait DatapathController: Send + Sync {
    /// Ids of datapaths the controller currently has a session with.
    fn list_active_datapaths(&self) -> Vec<u64>;

    /// Ask one datapath for its flow table. The reply, if any, arrives later
    /// as a [`ControllerEvent::FlowStatsReply`].
    fn request_flow_stats(&self, datapath_id: u64) -> Result<()>;
}

/// Inbound events delivered by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    DatapathUp(u64),
    DatapathDown(u64),
    FlowStatsReply {
        datapath_id: u64,
        entries: Vec<FlowStatsEntry>,
    },
}

impl ControllerEvent {
    pub fn datapath_id(&self) -> u64 {
        match self {
            ControllerEvent::DatapathUp(id) | ControllerEvent::DatapathDown(id) => *id,
            ControllerEvent::FlowStatsReply { datapath_id, .. } => *datapath_id,
        }
    }
}
