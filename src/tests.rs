#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use csv::StringRecord;
    use tokio::sync::{mpsc, watch};

    use crate::collector::StatisticsCollector;
    use crate::config::{DetectionConfig, LoopConfig, SimulationConfig, TrainingConfig};
    use crate::controller::{ControllerEvent, DatapathController};
    use crate::error::MonitorError;
    use crate::features::extract_reply;
    use crate::forest::{FlowClassifier, RandomForest};
    use crate::inference::{InferenceEngine, Verdict};
    use crate::monitor::MonitorLoop;
    use crate::schema::parse_feature_row;
    use crate::sim::{write_labeled_dataset, SimulatedController};
    use crate::snapshot::{
        read_snapshot_csv, write_snapshot_csv, FlowSnapshot, ResultsStore, SnapshotStore,
    };
    use crate::training::{load_dataset, run_training};

    fn trained_model(dir: &Path) -> RandomForest {
        let dataset_path = dir.join("dataset.csv");
        write_labeled_dataset(&SimulationConfig::default(), 8, &dataset_path).unwrap();
        train_on(&dataset_path)
    }

    fn train_on(dataset_path: &Path) -> RandomForest {
        let config = TrainingConfig {
            dataset_path: dataset_path.to_path_buf(),
            ..TrainingConfig::default()
        };
        let (model, report) = run_training(&config).unwrap();
        assert!(report.accuracy > 0.9, "accuracy {}", report.accuracy);
        model
    }

    fn flooding_sim(tx: mpsc::UnboundedSender<ControllerEvent>) -> SimulatedController {
        let config = SimulationConfig {
            attack_after_cycle: Some(1),
            ..SimulationConfig::default()
        };
        SimulatedController::new(config, tx).unwrap()
    }

    #[test]
    fn test_feature_vector_matches_its_own_csv_row() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sim = flooding_sim(tx);
        let mut collector = StatisticsCollector::new(Arc::new(SnapshotStore::in_memory()));
        collector.sync_with(&sim);
        collector.poll(&sim);
        while let Ok(event) = rx.try_recv() {
            collector.handle_event(event);
        }

        let snapshot = collector.store().take();
        assert!(!snapshot.is_empty());
        for record in &snapshot.records {
            let row = StringRecord::from(record.columns().to_vec());
            assert_eq!(parse_feature_row(&row).unwrap(), record.feature_vector().unwrap());
        }
    }

    #[test]
    fn test_snapshot_file_feeds_the_same_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let model = trained_model(dir.path());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sim = flooding_sim(tx);
        let mut records = Vec::new();
        for id in sim.list_active_datapaths() {
            sim.request_flow_stats(id).unwrap();
            if let Ok(ControllerEvent::FlowStatsReply { datapath_id, entries }) = rx.try_recv() {
                records.extend(extract_reply(datapath_id, 1_700_000_000.0, &entries));
            }
        }
        let path = dir.path().join("FlowStatsfile.csv");
        write_snapshot_csv(&path, &records).unwrap();

        let engine = InferenceEngine::new(
            Box::new(model),
            &DetectionConfig::default(),
            ResultsStore::default(),
        );
        let offline = engine.classify_rows(&read_snapshot_csv(&path).unwrap()).unwrap().unwrap();
        let live = engine
            .run(&FlowSnapshot::new(1, records))
            .unwrap()
            .unwrap();
        assert_eq!(offline, live.summary);
    }

    #[test]
    fn test_flood_is_attributed_to_the_victim_host() {
        let dir = tempfile::tempdir().unwrap();
        let model = trained_model(dir.path());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sim = flooding_sim(tx);
        let mut collector = StatisticsCollector::new(Arc::new(SnapshotStore::in_memory()));
        collector.sync_with(&sim);
        collector.poll(&sim);
        while let Ok(event) = rx.try_recv() {
            collector.handle_event(event);
        }

        let engine = InferenceEngine::new(
            Box::new(model),
            &DetectionConfig::default(),
            ResultsStore::default(),
        );
        let outcome = engine.run(&collector.store().take()).unwrap().unwrap();
        assert_eq!(outcome.verdict(), Verdict::Attack);
        // h10 is 10.0.0.10, and 100010 % 20 == 10
        assert_eq!(outcome.victim.unwrap().host_name(), "h10");
    }

    #[test]
    fn test_switch_lost_mid_cycle_contributes_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sim = flooding_sim(tx);
        let mut collector = StatisticsCollector::new(Arc::new(SnapshotStore::in_memory()));
        collector.sync_with(&sim);
        assert_eq!(collector.poll(&sim), 6);
        sim.disconnect(2).unwrap();
        while let Ok(event) = rx.try_recv() {
            collector.handle_event(event);
        }

        let snapshot = collector.store().take();
        assert!(!snapshot.is_empty());
        assert!(snapshot.records.iter().all(|r| r.datapath_id != 2));
        assert!(!collector.registry().contains(2));
    }

    #[test]
    fn test_training_is_reproducible_for_a_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        write_labeled_dataset(&SimulationConfig::default(), 4, &path).unwrap();
        let a = train_on(&path);
        let b = train_on(&path);

        let dataset = load_dataset(&path).unwrap();
        let (x, _) = dataset.to_arrays().unwrap();
        assert_eq!(a.classify(&x).unwrap(), b.classify(&x).unwrap());
    }

    #[test]
    fn test_dataset_with_bad_address_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        write_labeled_dataset(&SimulationConfig::default(), 1, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let corrupted = content.replacen(",10.0.0.", ",10.0.x.", 1);
        assert_ne!(content, corrupted);
        std::fs::write(&path, corrupted).unwrap();

        let err = load_dataset(&path).unwrap_err();
        assert!(matches!(err, MonitorError::DatasetError(_)));
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_reports_attack_once_the_flood_starts() {
        let dir = tempfile::tempdir().unwrap();
        let model = trained_model(dir.path());

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let sim = SimulatedController::new(
            SimulationConfig {
                attack_after_cycle: Some(2),
                ..SimulationConfig::default()
            },
            event_tx,
        )
        .unwrap();
        sim.connect_all().unwrap();

        let snapshot_path = dir.path().join("FlowStatsfile.csv");
        let results_path = dir.path().join("PredictFlowStatsfile.csv");
        let loop_config = LoopConfig {
            max_cycles: Some(3),
            snapshot_path: Some(snapshot_path.clone()),
            results_path: Some(results_path.clone()),
            ..LoopConfig::default()
        };
        let store = Arc::new(SnapshotStore::new(Some(snapshot_path.clone())));
        let collector = StatisticsCollector::new(store);
        let engine = InferenceEngine::new(
            Box::new(model),
            &DetectionConfig::default(),
            ResultsStore::new(Some(results_path.clone())),
        );
        let mut monitor = MonitorLoop::new(collector, engine, Box::new(sim), &loop_config);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let summary = monitor.run(event_rx, shutdown_rx).await.unwrap();

        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.failed_cycles, 0);
        assert_eq!(summary.attack_verdicts, 2);
        assert_eq!(summary.last_verdict, Some(Verdict::Attack));

        // the last hand-off leaves a header-only mirror
        assert!(read_snapshot_csv(&snapshot_path).unwrap().is_empty());
        assert!(std::fs::read_to_string(&snapshot_path).unwrap().starts_with("timestamp,"));
        assert!(read_snapshot_csv(&results_path).unwrap().is_empty());
    }
}
