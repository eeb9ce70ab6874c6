use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use log::info;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::TrainingConfig;
use crate::error::{MonitorError, Result};
use crate::flow::FEATURE_COUNT;
use crate::forest::{rows_to_matrix, FlowClassifier, RandomForest};
use crate::schema::{csv_reader, parse_feature_row, parse_label, ClassLabel, FeatureRow};

/// Historical flow rows with their ground-truth labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledDataset {
    pub rows: Vec<FeatureRow>,
    pub labels: Vec<ClassLabel>,
}

impl LabeledDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn subset(&self, indices: &[usize]) -> Self {
        Self {
            rows: indices.iter().map(|&i| self.rows[i]).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    pub fn to_arrays(&self) -> Result<(Array2<f64>, Array1<ClassLabel>)> {
        Ok((rows_to_matrix(&self.rows)?, Array1::from(self.labels.clone())))
    }
}

fn dataset_error(path: &Path, detail: impl fmt::Display) -> MonitorError {
    MonitorError::DatasetError(format!("{}: {}", path.display(), detail))
}

/// Load a labeled dataset: the flow-record columns followed by one label
/// column. Any malformed row aborts the load.
pub fn load_dataset(path: &Path) -> Result<LabeledDataset> {
    let mut reader = csv_reader(path).map_err(|e| dataset_error(path, e))?;
    let width = reader.headers().map_err(|e| dataset_error(path, e))?.len();
    if width != FEATURE_COUNT + 1 {
        return Err(dataset_error(
            path,
            format!(
                "expected {} feature columns plus a label column, header has {} columns",
                FEATURE_COUNT, width
            ),
        ));
    }

    let mut dataset = LabeledDataset::default();
    for (i, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let record = record.map_err(|e| dataset_error(path, format!("line {}: {}", line, e)))?;
        if record.len() != FEATURE_COUNT + 1 {
            return Err(dataset_error(
                path,
                format!("line {}: {} columns, expected {}", line, record.len(), FEATURE_COUNT + 1),
            ));
        }
        let row = parse_feature_row(&record)
            .map_err(|e| dataset_error(path, format!("line {}: {}", line, e)))?;
        let label = parse_label(&record[FEATURE_COUNT])
            .map_err(|e| dataset_error(path, format!("line {}: {}", line, e)))?;
        dataset.rows.push(row);
        dataset.labels.push(label);
    }

    if dataset.is_empty() {
        return Err(dataset_error(path, "no samples"));
    }
    Ok(dataset)
}

pub struct Split {
    pub train: LabeledDataset,
    pub test: LabeledDataset,
}

/// Seeded shuffle, then hold out `ceil(n * test_fraction)` rows.
pub fn train_test_split(dataset: &LabeledDataset, test_fraction: f64, seed: u64) -> Result<Split> {
    let n = dataset.len();
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(MonitorError::DatasetError(format!(
            "{} samples cannot be split with test fraction {}",
            n, test_fraction
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test_idx, train_idx) = indices.split_at(n_test);
    Ok(Split {
        train: dataset.subset(train_idx),
        test: dataset.subset(test_idx),
    })
}

/// Counts of (actual, predicted) pairs over the sorted label set.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    labels: Vec<ClassLabel>,
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn from_predictions(actual: &[ClassLabel], predicted: &[ClassLabel]) -> Self {
        let labels: Vec<ClassLabel> = actual
            .iter()
            .chain(predicted)
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut counts = vec![vec![0; labels.len()]; labels.len()];
        for (a, p) in actual.iter().zip(predicted) {
            // Both labels come from `labels`, so the searches cannot miss.
            if let (Ok(i), Ok(j)) = (labels.binary_search(a), labels.binary_search(p)) {
                counts[i][j] += 1;
            }
        }
        Self { labels, counts }
    }

    pub fn labels(&self) -> &[ClassLabel] {
        &self.labels
    }

    pub fn count(&self, actual: ClassLabel, predicted: ClassLabel) -> usize {
        match (self.labels.binary_search(&actual), self.labels.binary_search(&predicted)) {
            (Ok(i), Ok(j)) => self.counts[i][j],
            _ => 0,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.labels.len()).map(|i| self.counts[i][i]).sum();
        correct as f64 / total as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10}", "actual\\pred")?;
        for label in &self.labels {
            write!(f, " {:>8}", label)?;
        }
        for (label, row) in self.labels.iter().zip(&self.counts) {
            writeln!(f)?;
            write!(f, "{:>11}", label)?;
            for count in row {
                write!(f, " {:>8}", count)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub train_samples: usize,
    pub test_samples: usize,
    pub confusion: ConfusionMatrix,
    pub accuracy: f64,
    pub duration: Duration,
}

impl TrainingReport {
    pub fn log(&self) {
        info!("============================================================================");
        info!("Trained on {} samples, evaluated on {}", self.train_samples, self.test_samples);
        info!("Confusion Matrix\n{}", self.confusion);
        info!("Model Accuracy = {:.2} %", self.accuracy * 100.0);
        info!("Fail Accuracy = {:.2} %", (1.0 - self.accuracy) * 100.0);
        info!("Training time: {:?}", self.duration);
        info!("============================================================================");
    }
}

pub fn evaluate(model: &dyn FlowClassifier, test: &LabeledDataset) -> Result<ConfusionMatrix> {
    let (x, _) = test.to_arrays()?;
    let predicted = model.classify(&x)?;
    Ok(ConfusionMatrix::from_predictions(&test.labels, &predicted))
}

/// Load, split, fit and evaluate. The model is returned whatever its
/// accuracy; the report is diagnostic only.
pub fn run_training(config: &TrainingConfig) -> Result<(RandomForest, TrainingReport)> {
    info!("***** Flow Training *****");
    let start = Instant::now();

    let dataset = load_dataset(&config.dataset_path)?;
    let split = train_test_split(&dataset, config.test_fraction, config.forest.seed)?;
    let (x, y) = split.train.to_arrays()?;
    let model = RandomForest::fit(&x, &y, &config.forest)?;
    let confusion = evaluate(&model, &split.test)?;

    let report = TrainingReport {
        train_samples: split.train.len(),
        test_samples: split.test.len(),
        accuracy: confusion.accuracy(),
        confusion,
        duration: start.elapsed(),
    };
    report.log();
    Ok((model, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FLOW_STATS_HEADER;
    use std::io::Write;

    fn header() -> String {
        let mut cols: Vec<&str> = FLOW_STATS_HEADER.to_vec();
        cols.push("label");
        cols.join(",")
    }

    fn row(i: usize, attack: bool) -> String {
        let dst = if attack { 10 } else { 2 + (i % 5) };
        let (packets, rate) = if attack { (5000 + i, 900.0) } else { (20 + i % 9, 2.0) };
        let proto = if attack { 1 } else { 6 };
        format!(
            "1700000000.{i},1,10.0.0.{src}010.0.0.{dst}0{proto},10.0.0.{src},0,10.0.0.{dst},0,\
             {proto},-1,-1,5,1000,20,100,0,{packets},{bytes},{rate},0.5,{brate},0.01,{label}",
            i = i % 10,
            src = 1 + i % 3,
            dst = dst,
            proto = proto,
            packets = packets,
            bytes = packets * 98,
            rate = rate,
            brate = rate * 98.0,
            label = if attack { 1 } else { 0 },
        )
    }

    fn write_dataset(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", header()).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    fn balanced(n: usize) -> Vec<String> {
        (0..n).map(|i| row(i, i % 2 == 1)).collect()
    }

    #[test]
    fn loads_rows_and_labels() {
        let file = write_dataset(&balanced(8));
        let dataset = load_dataset(file.path()).unwrap();
        assert_eq!(dataset.len(), 8);
        assert_eq!(dataset.labels[..4], [0, 1, 0, 1]);
        assert_eq!(dataset.rows[0][3], 10001.0);
        assert_eq!(dataset.rows[0][5], 10002.0);
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = load_dataset(Path::new("/nonexistent/flow_dataset.csv")).unwrap_err();
        assert!(matches!(err, MonitorError::DatasetError(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_label_column_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", FLOW_STATS_HEADER.join(",")).unwrap();
        let err = load_dataset(file.path()).unwrap_err();
        assert!(err.to_string().contains("label column"));
    }

    #[test]
    fn unseen_address_format_fails_at_load() {
        let mut lines = balanced(4);
        lines.push(lines[0].replacen("10.0.0.1,", "fe80::1,", 1));
        let file = write_dataset(&lines);
        let err = load_dataset(file.path()).unwrap_err();
        assert!(matches!(err, MonitorError::DatasetError(_)));
        assert!(err.to_string().contains("line 6"));
    }

    #[test]
    fn bad_label_fails_at_load() {
        let mut lines = balanced(2);
        let broken = format!("{}ddos", lines[1].trim_end_matches('1'));
        lines.push(broken);
        let file = write_dataset(&lines);
        assert!(load_dataset(file.path()).is_err());
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let file = write_dataset(&[]);
        assert!(load_dataset(file.path()).is_err());
    }

    #[test]
    fn split_is_seeded_and_sized() {
        let file = write_dataset(&balanced(10));
        let dataset = load_dataset(file.path()).unwrap();

        let a = train_test_split(&dataset, 0.25, 0).unwrap();
        let b = train_test_split(&dataset, 0.25, 0).unwrap();
        assert_eq!(a.test.len(), 3);
        assert_eq!(a.train.len(), 7);
        assert_eq!(a.test, b.test);
        assert_eq!(a.train, b.train);
    }

    #[test]
    fn single_row_cannot_be_split() {
        let file = write_dataset(&balanced(1));
        let dataset = load_dataset(file.path()).unwrap();
        assert!(train_test_split(&dataset, 0.25, 0).is_err());
    }

    #[test]
    fn confusion_matrix_counts_pairs() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 1, 1], &[0, 1, 1, 1, 0]);
        assert_eq!(cm.labels(), &[0, 1]);
        assert_eq!(cm.count(0, 0), 1);
        assert_eq!(cm.count(0, 1), 1);
        assert_eq!(cm.count(1, 0), 1);
        assert_eq!(cm.count(1, 1), 2);
        assert!((cm.accuracy() - 0.6).abs() < 1e-9);
        assert!(cm.to_string().contains("actual\\pred"));
    }

    #[test]
    fn full_pipeline_trains_and_reports() {
        let file = write_dataset(&balanced(120));
        let config = TrainingConfig {
            dataset_path: file.path().to_path_buf(),
            ..TrainingConfig::default()
        };
        let (model, report) = run_training(&config).unwrap();
        assert_eq!(model.n_features(), FEATURE_COUNT);
        assert_eq!(report.test_samples, 30);
        assert_eq!(report.train_samples, 90);
        assert!(report.accuracy > 0.9);
        assert_eq!(report.confusion.total(), 30);
    }
}
