use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{MonitorError, Result};
use crate::flow::{FlowRecord, FLOW_STATS_HEADER};
use crate::schema::{csv_reader, parse_feature_row, FeatureRow};

/// Every flow record captured during one poll cycle.
#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    pub cycle: u64,
    pub taken_at: DateTime<Utc>,
    pub records: Vec<FlowRecord>,
}

impl FlowSnapshot {
    pub fn new(cycle: u64, records: Vec<FlowRecord>) -> Self {
        Self {
            cycle,
            taken_at: Utc::now(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Default)]
struct StoreInner {
    by_datapath: BTreeMap<u64, Vec<FlowRecord>>,
    cycle: u64,
}

impl StoreInner {
    fn flatten(&self) -> Vec<FlowRecord> {
        self.by_datapath.values().flatten().cloned().collect()
    }
}

/// Hand-off point between the collector and the inference engine.
///
/// Each reply replaces its datapath's records wholesale. [`take`] hands the
/// whole set to the engine and starts a fresh cycle, so nothing accumulates
/// across passes. When a mirror path is set, the current set is also
/// rewritten to CSV on every change.
///
/// [`take`]: SnapshotStore::take
pub struct SnapshotStore {
    inner: Mutex<StoreInner>,
    mirror: Option<PathBuf>,
}

impl SnapshotStore {
    pub fn new(mirror: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            mirror,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Rewrites the mirror while still holding the lock, so concurrent
    /// replies never interleave their rows in the file.
    pub fn replace(&self, datapath_id: u64, records: Vec<FlowRecord>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.by_datapath.insert(datapath_id, records);
        if let Some(path) = &self.mirror {
            write_snapshot_csv(path, &inner.flatten())?;
        }
        Ok(())
    }

    /// Drop a datapath's records from the cycle in progress.
    pub fn discard(&self, datapath_id: u64) {
        self.inner.lock().by_datapath.remove(&datapath_id);
    }

    /// Hand over the cycle's records and start an empty one. The mirror is
    /// cut back to the header so it never shows a previous cycle.
    pub fn take(&self) -> FlowSnapshot {
        let mut inner = self.inner.lock();
        let records = inner.flatten();
        inner.by_datapath.clear();
        inner.cycle += 1;
        if let Some(path) = &self.mirror {
            if let Err(e) = write_snapshot_csv(path, &[]) {
                warn!("snapshot mirror not cleared: {}", e);
            }
        }
        debug!("snapshot cycle {} taken with {} records", inner.cycle, records.len());
        FlowSnapshot::new(inner.cycle, records)
    }

    pub fn pending_records(&self) -> usize {
        self.inner.lock().by_datapath.values().map(Vec::len).sum()
    }
}

fn csv_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(FLOW_STATS_HEADER)?;
    Ok(writer)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Replace `path` with the header and one row per record. Rows go to a
/// sibling file first, which is then renamed over `path`.
pub fn write_snapshot_csv(path: &Path, records: &[FlowRecord]) -> Result<()> {
    let staging = staging_path(path);
    let mut writer = csv_writer(&staging)
        .map_err(|e| MonitorError::SnapshotError(format!("{}: {}", staging.display(), e)))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    drop(writer);
    std::fs::rename(&staging, path)
        .map_err(|e| MonitorError::SnapshotError(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

/// Read a persisted snapshot back as model rows.
pub fn read_snapshot_csv(path: &Path) -> Result<Vec<FeatureRow>> {
    let mut reader = csv_reader(path)
        .map_err(|e| MonitorError::SnapshotError(format!("{}: {}", path.display(), e)))?;
    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let row = parse_feature_row(&record).map_err(|e| {
            MonitorError::SnapshotError(format!("{} row {}: {}", path.display(), i + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Downstream decision table. It is put back to header-only after every
/// inference pass so a stale decision set is never picked up.
#[derive(Debug, Clone, Default)]
pub struct ResultsStore {
    path: Option<PathBuf>,
}

impl ResultsStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn reset(&self) -> Result<()> {
        if let Some(path) = &self.path {
            let mut writer = csv_writer(path)
                .map_err(|e| MonitorError::SnapshotError(format!("{}: {}", path.display(), e)))?;
            writer.flush()?;
        }
        Ok(())
    }
}
