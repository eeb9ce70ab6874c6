mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::{mpsc, watch};

use sdn_flow_monitor::collector::StatisticsCollector;
use sdn_flow_monitor::error::Result;
use sdn_flow_monitor::inference::{InferenceEngine, Verdict};
use sdn_flow_monitor::monitor::MonitorLoop;
use sdn_flow_monitor::sim::{write_labeled_dataset, SimulatedController};
use sdn_flow_monitor::snapshot::{read_snapshot_csv, ResultsStore, SnapshotStore};
use sdn_flow_monitor::training::run_training;

use cli::{ClassifyArgs, Cli, Command, GenerateArgs, MonitorArgs, TrainArgs};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();
    let result = match args.command {
        Command::Monitor(args) => run_monitor(args),
        Command::Train(args) => run_train(args),
        Command::Classify(args) => run_classify(args),
        Command::Generate(args) => run_generate(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_fatal() => {
            error!("startup aborted: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_monitor(args: MonitorArgs) -> Result<()> {
    let config = args.config()?;

    // Nothing is polled until a model exists.
    let (model, _report) = run_training(&config.training)?;

    let store = Arc::new(SnapshotStore::new(config.monitor.snapshot_path.clone()));
    let results = ResultsStore::new(config.monitor.results_path.clone());
    results.reset()?;
    let engine = InferenceEngine::new(Box::new(model), &config.detection, results);
    let collector = StatisticsCollector::new(store);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let controller = SimulatedController::new(config.simulation.clone(), event_tx)?;
    controller.connect_all()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, stopping monitor...");
        let _ = shutdown_tx.send(true);
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let mut monitor = MonitorLoop::new(collector, engine, Box::new(controller), &config.monitor);
    let summary = runtime.block_on(monitor.run(event_rx, shutdown_rx))?;

    info!(
        "{} cycles, {} attack verdicts, {} failed cycles",
        summary.cycles, summary.attack_verdicts, summary.failed_cycles
    );
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = args.common.load()?;
    config.validate()?;
    let (model, report) = run_training(&config.training)?;
    info!(
        "{} trees over {} features, accuracy {:.2} %",
        model.n_trees(),
        model.n_features(),
        report.accuracy * 100.0
    );
    Ok(())
}

fn run_classify(args: ClassifyArgs) -> Result<()> {
    let config = args.common.load()?;
    config.validate()?;
    let rows = read_snapshot_csv(&args.snapshot)?;
    let (model, _report) = run_training(&config.training)?;

    let engine = InferenceEngine::new(Box::new(model), &config.detection, ResultsStore::default());
    match engine.classify_rows(&rows)? {
        None => info!("{}: no flows to classify", args.snapshot.display()),
        Some(summary) => {
            info!(
                "{}: {} flows, {} legitimate, {} attack",
                args.snapshot.display(),
                summary.total,
                summary.legitimate,
                summary.attack
            );
            match summary.verdict {
                Verdict::Legitimate => info!("verdict: {}", summary.verdict),
                Verdict::Attack => warn!("verdict: {}", summary.verdict),
            }
        }
    }
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    let config = args.common.load()?;
    config.validate()?;
    write_labeled_dataset(&config.simulation, args.polls, &args.output)?;
    Ok(())
}
