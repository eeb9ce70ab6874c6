use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};

use crate::controller::{ControllerEvent, DatapathController};
use crate::error::Result;
use crate::features::extract_reply;
use crate::flow::FlowStatsEntry;
use crate::registry::DatapathRegistry;
use crate::snapshot::SnapshotStore;

/// Polls registered datapaths and turns their replies into the current
/// snapshot. It never talks to the inference engine directly; the engine
/// only sees what lands in the [`SnapshotStore`].
pub struct StatisticsCollector {
    registry: DatapathRegistry,
    store: Arc<SnapshotStore>,
}

impl StatisticsCollector {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self {
            registry: DatapathRegistry::new(),
            store,
        }
    }

    pub fn registry(&self) -> &DatapathRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn on_datapath_up(&mut self, datapath_id: u64) {
        self.registry.register(datapath_id);
    }

    pub fn on_datapath_down(&mut self, datapath_id: u64) {
        if self.registry.unregister(datapath_id) {
            self.store.discard(datapath_id);
        }
    }

    /// Replace this datapath's share of the snapshot with the reply's flows.
    pub fn on_flow_stats_reply(
        &mut self,
        datapath_id: u64,
        entries: &[FlowStatsEntry],
    ) -> Result<usize> {
        if !self.registry.contains(datapath_id) {
            debug!("dropping stats reply from unregistered datapath {:016x}", datapath_id);
            return Ok(0);
        }
        let timestamp = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        let records = extract_reply(datapath_id, timestamp, entries);
        let count = records.len();
        self.store.replace(datapath_id, records)?;
        debug!("datapath {:016x}: {} flow records", datapath_id, count);
        Ok(count)
    }

    pub fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::DatapathUp(id) => self.on_datapath_up(id),
            ControllerEvent::DatapathDown(id) => self.on_datapath_down(id),
            ControllerEvent::FlowStatsReply { datapath_id, entries } => {
                if let Err(e) = self.on_flow_stats_reply(datapath_id, &entries) {
                    warn!("stats reply from {:016x} not stored: {}", datapath_id, e);
                }
            }
        }
    }

    /// Register whatever the controller already has a session with.
    pub fn sync_with(&mut self, controller: &dyn DatapathController) -> usize {
        controller
            .list_active_datapaths()
            .into_iter()
            .filter(|id| self.registry.register(*id))
            .count()
    }

    /// Send one stats request per registered datapath. Returns how many
    /// requests went out; failures are logged and skipped.
    pub fn poll(&self, controller: &dyn DatapathController) -> usize {
        let mut sent = 0;
        for datapath_id in self.registry.snapshot() {
            debug!("send stats request: {:016x}", datapath_id);
            match controller.request_flow_stats(datapath_id) {
                Ok(()) => sent += 1,
                Err(e) => warn!("stats request to {:016x} failed: {}", datapath_id, e),
            }
        }
        sent
    }
}
