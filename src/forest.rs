use std::collections::BTreeMap;

use linfa::prelude::*;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::schema::{ClassLabel, FeatureRow};

/// Anything that can label a matrix of flow feature rows.
pub trait FlowClassifier: Send + Sync {
    fn classify(&self, rows: &Array2<f64>) -> Result<Vec<ClassLabel>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitCriterion {
    Gini,
    Entropy,
}

impl From<SplitCriterion> for SplitQuality {
    fn from(criterion: SplitCriterion) -> Self {
        match criterion {
            SplitCriterion::Gini => SplitQuality::Gini,
            SplitCriterion::Entropy => SplitQuality::Entropy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub criterion: SplitCriterion,
    pub max_depth: Option<usize>,
    /// Columns drawn per tree; `None` keeps every column.
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 10,
            criterion: SplitCriterion::Entropy,
            max_depth: None,
            max_features: None,
            bootstrap: true,
            seed: 0,
        }
    }
}

struct ForestTree {
    columns: Vec<usize>,
    tree: DecisionTree<f64, ClassLabel>,
}

/// Bagged ensemble of decision trees.
///
/// Tree `i` draws its bootstrap rows and column subset from an RNG seeded
/// with `seed + i`, so the fitted forest does not depend on how rayon
/// schedules the trees.
pub struct RandomForest {
    trees: Vec<ForestTree>,
    n_features: usize,
}

impl RandomForest {
    pub fn fit(
        records: &Array2<f64>,
        targets: &Array1<ClassLabel>,
        params: &ForestParams,
    ) -> Result<Self> {
        let n_samples = records.nrows();
        let n_features = records.ncols();
        if n_samples == 0 {
            return Err(MonitorError::ModelError("no training samples".to_string()));
        }
        if n_samples != targets.len() {
            return Err(MonitorError::ModelError(format!(
                "{} samples but {} labels",
                n_samples,
                targets.len()
            )));
        }
        if n_features == 0 {
            return Err(MonitorError::ModelError("no feature columns".to_string()));
        }
        if params.n_trees == 0 {
            return Err(MonitorError::ModelError("ensemble needs at least one tree".to_string()));
        }
        let subspace = params.max_features.unwrap_or(n_features).clamp(1, n_features);

        let trees = (0..params.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(i as u64));
                let rows: Vec<usize> = if params.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                let mut columns = sample(&mut rng, n_features, subspace).into_vec();
                columns.sort_unstable();

                let x = records.select(Axis(0), &rows).select(Axis(1), &columns);
                let y = targets.select(Axis(0), &rows);
                let dataset = DatasetBase::new(x, y);

                let tree = DecisionTree::params()
                    .split_quality(params.criterion.into())
                    .max_depth(params.max_depth)
                    .fit(&dataset)
                    .map_err(|e| MonitorError::ModelError(format!("tree {}: {:?}", i, e)))?;
                Ok(ForestTree { columns, tree })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { trees, n_features })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

impl FlowClassifier for RandomForest {
    /// Majority vote across trees; ties go to the smallest label.
    fn classify(&self, rows: &Array2<f64>) -> Result<Vec<ClassLabel>> {
        if rows.ncols() != self.n_features {
            return Err(MonitorError::ModelError(format!(
                "model expects {} features, got {}",
                self.n_features,
                rows.ncols()
            )));
        }

        let mut votes: Vec<BTreeMap<ClassLabel, usize>> = vec![BTreeMap::new(); rows.nrows()];
        for t in &self.trees {
            let input = rows.select(Axis(1), &t.columns);
            let predicted = t.tree.predict(&input);
            for (row_votes, label) in votes.iter_mut().zip(predicted.iter()) {
                *row_votes.entry(*label).or_insert(0) += 1;
            }
        }

        Ok(votes
            .into_iter()
            .map(|row_votes| {
                let mut best = (0, 0);
                for (label, count) in row_votes {
                    if count > best.1 {
                        best = (label, count);
                    }
                }
                best.0
            })
            .collect())
    }
}

/// Stack feature rows into the matrix layout the classifier takes.
pub fn rows_to_matrix(rows: &[FeatureRow]) -> Result<Array2<f64>> {
    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    let flat: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Array2::from_shape_vec((rows.len(), width), flat)
        .map_err(|e| MonitorError::ModelError(e.to_string()))
}
