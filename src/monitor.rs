use std::fmt;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::collector::StatisticsCollector;
use crate::config::LoopConfig;
use crate::controller::{ControllerEvent, DatapathController};
use crate::error::{MonitorError, Result};
use crate::inference::{InferenceEngine, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Polling,
    Waiting,
    Inferring,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Idle => "IDLE",
            MonitorState::Polling => "POLLING",
            MonitorState::Waiting => "WAITING",
            MonitorState::Inferring => "INFERRING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSummary {
    pub cycles: u64,
    pub attack_verdicts: u64,
    pub failed_cycles: u64,
    pub last_verdict: Option<Verdict>,
}

enum WaitResult {
    Elapsed,
    Shutdown,
}

/// Drives the poll / wait / infer cycle.
///
/// The loop owns the collector and the engine, and controller events are
/// only handled while it sits in `Waiting`, so no two handlers ever run at
/// the same time.
pub struct MonitorLoop {
    collector: StatisticsCollector,
    engine: InferenceEngine,
    controller: Box<dyn DatapathController>,
    poll_interval: Duration,
    max_cycles: Option<u64>,
    state: MonitorState,
}

impl MonitorLoop {
    pub fn new(
        collector: StatisticsCollector,
        engine: InferenceEngine,
        controller: Box<dyn DatapathController>,
        config: &LoopConfig,
    ) -> Self {
        Self {
            collector,
            engine,
            controller,
            poll_interval: config.poll_interval(),
            max_cycles: config.max_cycles,
            state: MonitorState::Idle,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn collector(&self) -> &StatisticsCollector {
        &self.collector
    }

    fn set_state(&mut self, state: MonitorState) {
        debug!("monitor {} -> {}", self.state, state);
        self.state = state;
    }

    /// Run until `shutdown` flips to `true` (or its sender goes away) or
    /// `max_cycles` cycles have completed.
    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<ControllerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<MonitorSummary> {
        if self.poll_interval.is_zero() {
            return Err(MonitorError::ConfigError("poll interval must be non-zero".to_string()));
        }

        let known = self.collector.sync_with(self.controller.as_ref());
        info!(
            "monitor started: {} datapaths known, polling every {:?}",
            known, self.poll_interval
        );

        let mut summary = MonitorSummary::default();
        let mut events_open = true;

        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }

            self.set_state(MonitorState::Polling);
            let sent = self.collector.poll(self.controller.as_ref());
            debug!("{} stats requests sent", sent);

            self.set_state(MonitorState::Waiting);
            let deadline = Instant::now() + self.poll_interval;
            match self.wait(deadline, &mut events, &mut events_open, &mut shutdown).await {
                WaitResult::Elapsed => {}
                WaitResult::Shutdown => break,
            }

            self.set_state(MonitorState::Inferring);
            let snapshot = self.collector.store().take();
            match self.engine.run(&snapshot) {
                Ok(Some(outcome)) => {
                    if outcome.verdict() == Verdict::Attack {
                        summary.attack_verdicts += 1;
                    }
                    summary.last_verdict = Some(outcome.verdict());
                }
                Ok(None) => {}
                Err(e) => {
                    error!("cycle {} failed: {}", snapshot.cycle, e);
                    summary.failed_cycles += 1;
                }
            }
            summary.cycles += 1;
        }

        self.set_state(MonitorState::Idle);
        info!(
            "monitor stopped after {} cycles ({} attack verdicts, {} failed)",
            summary.cycles, summary.attack_verdicts, summary.failed_cycles
        );
        Ok(summary)
    }

    async fn wait(
        &mut self,
        deadline: Instant,
        events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
        events_open: &mut bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> WaitResult {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return WaitResult::Elapsed,
                event = events.recv(), if *events_open => match event {
                    Some(event) => {
                        debug!("event from datapath {:016x}", event.datapath_id());
                        self.collector.handle_event(event);
                    }
                    None => {
                        debug!("controller event channel closed");
                        *events_open = false;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return WaitResult::Shutdown;
                    }
                }
            }
        }
    }
}
