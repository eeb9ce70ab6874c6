//! Column layout shared by the training dataset and persisted snapshots.
//!
//! Both sides go through [`parse_feature_row`], which in turn uses
//! [`numeric_feature`], so a dataset row and a live record with the same
//! values always produce the same model input.

use std::fs::File;
use std::path::Path;

use csv::StringRecord;

use crate::error::{MonitorError, Result};
use crate::features::numeric_feature;
use crate::flow::{FEATURE_COUNT, FLOW_STATS_HEADER};

pub type FeatureRow = [f64; FEATURE_COUNT];

/// Class label produced by the model. Zero is legitimate traffic.
pub type ClassLabel = usize;

pub const LEGITIMATE_LABEL: ClassLabel = 0;

/// Parse the first [`FEATURE_COUNT`] columns of a CSV record.
pub fn parse_feature_row(record: &StringRecord) -> Result<FeatureRow> {
    if record.len() < FEATURE_COUNT {
        return Err(MonitorError::SchemaError(format!(
            "expected at least {} columns, found {}",
            FEATURE_COUNT,
            record.len()
        )));
    }
    let mut row = [0.0; FEATURE_COUNT];
    for (i, slot) in row.iter_mut().enumerate() {
        *slot = numeric_feature(i, &record[i])?;
    }
    Ok(row)
}

/// Parse a label column. Labels are non-negative integers; a float with no
/// fractional part ("1.0") is accepted since dataset exports often write them
/// that way.
pub fn parse_label(value: &str) -> Result<ClassLabel> {
    let trimmed = value.trim();
    if let Ok(label) = trimmed.parse::<ClassLabel>() {
        return Ok(label);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 => Ok(v as ClassLabel),
        _ => Err(MonitorError::SchemaError(format!("label '{}' is not a class id", value))),
    }
}

pub fn csv_reader(path: &Path) -> Result<csv::Reader<File>> {
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?)
}

pub fn header_record() -> StringRecord {
    StringRecord::from(FLOW_STATS_HEADER.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Vec<&'static str> {
        vec![
            "1700000000.5", "1", "10.0.0.18010.0.0.250006", "10.0.0.1", "80", "10.0.0.2", "5000",
            "6", "-1", "-1", "4", "500", "20", "100", "0", "40", "4000", "10", "0.08", "1000", "8",
        ]
    }

    #[test]
    fn parses_a_full_row() {
        let row = parse_feature_row(&StringRecord::from(sample_row())).unwrap();
        assert_eq!(row[1], 1.0);
        assert_eq!(row[3], 10001.0);
        assert_eq!(row[5], 10002.0);
        assert_eq!(row[8], -1.0);
        assert_eq!(row[20], 8.0);
    }

    #[test]
    fn short_rows_are_rejected() {
        let mut cols = sample_row();
        cols.truncate(10);
        assert!(parse_feature_row(&StringRecord::from(cols)).is_err());
    }

    #[test]
    fn labels_accept_integers_and_integral_floats() {
        assert_eq!(parse_label("0").unwrap(), 0);
        assert_eq!(parse_label(" 1 ").unwrap(), 1);
        assert_eq!(parse_label("2.0").unwrap(), 2);
        assert!(parse_label("0.5").is_err());
        assert!(parse_label("-1").is_err());
        assert!(parse_label("ddos").is_err());
    }

    #[test]
    fn header_record_has_every_column() {
        assert_eq!(header_record().len(), FEATURE_COUNT);
    }
}
