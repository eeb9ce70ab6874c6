use std::fmt;
use std::net::Ipv4Addr;

use log::{debug, info, warn};

use crate::config::DetectionConfig;
use crate::error::{MonitorError, Result};
use crate::flow::{FlowRecord, IpProtocol};
use crate::forest::{rows_to_matrix, FlowClassifier};
use crate::schema::{ClassLabel, FeatureRow, LEGITIMATE_LABEL};
use crate::snapshot::{FlowSnapshot, ResultsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Legitimate,
    Attack,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Legitimate => write!(f, "LEGITIMATE"),
            Verdict::Attack => write!(f, "ATTACK"),
        }
    }
}

/// Aggregate of one pass's per-flow labels.
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictSummary {
    pub total: usize,
    pub legitimate: usize,
    pub attack: usize,
    pub legitimate_fraction: f64,
    pub verdict: Verdict,
}

impl VerdictSummary {
    /// `None` for an empty label set, where the fraction is undefined.
    pub fn from_labels(labels: &[ClassLabel], legitimate_threshold: f64) -> Option<Self> {
        if labels.is_empty() {
            return None;
        }
        let legitimate = labels.iter().filter(|&&l| l == LEGITIMATE_LABEL).count();
        let total = labels.len();
        let legitimate_fraction = legitimate as f64 / total as f64;
        let verdict = if legitimate_fraction > legitimate_threshold {
            Verdict::Legitimate
        } else {
            Verdict::Attack
        };
        Some(Self {
            total,
            legitimate,
            attack: total - legitimate,
            legitimate_fraction,
            verdict,
        })
    }
}

/// Best-effort guess at the targeted host. The host index is the numeric
/// destination address reduced modulo the configured host count, which only
/// lines up with host numbering on small flat address plans.
#[derive(Debug, Clone, PartialEq)]
pub struct VictimAttribution {
    pub host_index: u64,
    pub dst_ip: Ipv4Addr,
    pub protocol: IpProtocol,
    pub datapath_id: u64,
    pub flow_id: String,
}

impl VictimAttribution {
    pub fn host_name(&self) -> String {
        format!("h{}", self.host_index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutcome {
    pub cycle: u64,
    pub labels: Vec<ClassLabel>,
    pub summary: VerdictSummary,
    pub victim: Option<VictimAttribution>,
}

impl InferenceOutcome {
    pub fn verdict(&self) -> Verdict {
        self.summary.verdict
    }
}

/// Applies the trained model to each snapshot and turns the labels into a
/// network-wide verdict.
pub struct InferenceEngine {
    model: Box<dyn FlowClassifier>,
    legitimate_threshold: f64,
    host_count: u64,
    results: ResultsStore,
}

impl InferenceEngine {
    pub fn new(
        model: Box<dyn FlowClassifier>,
        config: &DetectionConfig,
        results: ResultsStore,
    ) -> Self {
        Self {
            model,
            legitimate_threshold: config.legitimate_threshold,
            host_count: config.host_count.max(1),
            results,
        }
    }

    /// One inference pass. An empty snapshot yields `Ok(None)`. The results
    /// store is reset afterwards whether or not the pass succeeded.
    pub fn run(&self, snapshot: &FlowSnapshot) -> Result<Option<InferenceOutcome>> {
        let outcome = self.evaluate(snapshot);
        if let Err(e) = self.results.reset() {
            warn!("results store not reset: {}", e);
        }
        let outcome = outcome?;
        if let Some(outcome) = &outcome {
            log_outcome(outcome);
        }
        Ok(outcome)
    }

    fn evaluate(&self, snapshot: &FlowSnapshot) -> Result<Option<InferenceOutcome>> {
        if snapshot.is_empty() {
            debug!("cycle {}: empty snapshot, no verdict", snapshot.cycle);
            return Ok(None);
        }

        let rows = snapshot
            .records
            .iter()
            .map(FlowRecord::feature_vector)
            .collect::<Result<Vec<_>>>()?;
        let labels = self.predict_rows(&rows)?;

        let summary = match VerdictSummary::from_labels(&labels, self.legitimate_threshold) {
            Some(summary) => summary,
            None => return Ok(None),
        };
        let victim = match summary.verdict {
            Verdict::Attack => self.attribute_victim(&snapshot.records, &labels)?,
            Verdict::Legitimate => None,
        };

        Ok(Some(InferenceOutcome {
            cycle: snapshot.cycle,
            labels,
            summary,
            victim,
        }))
    }

    pub fn predict_rows(&self, rows: &[FeatureRow]) -> Result<Vec<ClassLabel>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let matrix = rows_to_matrix(rows)?;
        let labels = self.model.classify(&matrix)?;
        if labels.len() != rows.len() {
            return Err(MonitorError::ModelError(format!(
                "model returned {} labels for {} flows",
                labels.len(),
                rows.len()
            )));
        }
        Ok(labels)
    }

    /// Verdict for rows that are already numeric, e.g. a persisted snapshot.
    pub fn classify_rows(&self, rows: &[FeatureRow]) -> Result<Option<VerdictSummary>> {
        let labels = self.predict_rows(rows)?;
        Ok(VerdictSummary::from_labels(&labels, self.legitimate_threshold))
    }

    /// Uses the last attack-labelled record in snapshot order.
    fn attribute_victim(
        &self,
        records: &[FlowRecord],
        labels: &[ClassLabel],
    ) -> Result<Option<VictimAttribution>> {
        let flagged = records
            .iter()
            .zip(labels)
            .rev()
            .find(|(_, &label)| label != LEGITIMATE_LABEL)
            .map(|(record, _)| record);

        let record = match flagged {
            Some(record) => record,
            None => return Ok(None),
        };
        Ok(Some(VictimAttribution {
            host_index: record.dst_numeric()? % self.host_count,
            dst_ip: record.ip_dst,
            protocol: record.protocol(),
            datapath_id: record.datapath_id,
            flow_id: record.flow_id.clone(),
        }))
    }
}

pub fn log_outcome(outcome: &InferenceOutcome) {
    let s = &outcome.summary;
    info!("============================================================================");
    info!(
        "cycle {}: {} flows, {} legitimate, {} attack ({:.1}% legitimate)",
        outcome.cycle,
        s.total,
        s.legitimate,
        s.attack,
        s.legitimate_fraction * 100.0
    );
    match s.verdict {
        Verdict::Legitimate => info!("***************** Legitimate Traffic *****************"),
        Verdict::Attack => {
            warn!("!!!!!!!!!!!!!!!!!!!! DDoS Traffic !!!!!!!!!!!!!!!!!!!!");
            if let Some(victim) = &outcome.victim {
                warn!(
                    "Probable victim is host {} (dst {}, {} flow via datapath {:016x})",
                    victim.host_name(),
                    victim.dst_ip,
                    victim.protocol,
                    victim.datapath_id
                );
            }
        }
    }
    info!("============================================================================");
}
