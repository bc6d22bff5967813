use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use voltwatch_core::{ModelConfig, ModelKind};

use super::tree::{RegressionTree, TreeParams};
use super::{FittedModel, Regressor};
use crate::error::{ComputeError, ComputeResult};

/// Bagged ensemble of regression trees; predictions are the tree mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    /// Sorted distinct fit rows drawn by each tree.
    #[serde(default)]
    in_bag: Vec<Vec<usize>>,
}

impl RandomForest {
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    /// Out-of-bag prediction for fit row `index`: the mean over trees that
    /// never drew it. Falls back to the full ensemble when every tree did.
    pub fn predict_held_out(&self, row: &[f64], index: usize) -> f64 {
        let mut sum = 0.0;
        let mut n = 0usize;
        for (tree, bag) in self.trees.iter().zip(&self.in_bag) {
            if bag.binary_search(&index).is_err() {
                sum += tree.predict_row(row);
                n += 1;
            }
        }
        if n == 0 {
            self.predict_row(row)
        } else {
            sum / n as f64
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

/// Random forest trainer. Tree `i` draws from `StdRng::seed_from_u64(seed + i)`,
/// so the fitted ensemble does not depend on thread scheduling.
#[derive(Debug, Clone)]
pub struct ForestRegressor {
    pub n_estimators: usize,
    pub bootstrap: bool,
    pub max_features: Option<f64>,
    pub params: TreeParams,
    pub seed: u64,
}

impl ForestRegressor {
    pub fn from_config(config: &ModelConfig, seed: u64) -> Self {
        Self {
            n_estimators: config.n_estimators,
            bootstrap: config.bootstrap,
            max_features: config.max_features,
            params: TreeParams {
                max_depth: config.max_depth,
                min_samples_split: config.min_samples_split,
                min_samples_leaf: config.min_samples_leaf,
                max_features: usize::MAX,
            },
            seed,
        }
    }

    fn features_per_split(&self, n_features: usize) -> usize {
        match self.max_features {
            Some(frac) if frac > 0.0 && frac < 1.0 => ((n_features as f64 * frac).ceil() as usize).max(1),
            _ => n_features,
        }
    }
}

impl Regressor for ForestRegressor {
    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
    }

    fn fit(&self, x: &DMatrix<f64>, y: &[f64]) -> ComputeResult<FittedModel> {
        if x.nrows() != y.len() {
            return Err(ComputeError::Model(format!("{} feature rows for {} targets", x.nrows(), y.len())));
        }
        if x.nrows() == 0 {
            return Err(ComputeError::EmptyInput("no rows to fit".into()));
        }
        let n = x.nrows();
        let params = TreeParams {
            max_features: self.features_per_split(x.ncols()),
            ..self.params
        };

        let grown: Vec<(RegressionTree, Vec<usize>)> = (0..self.n_estimators.max(1))
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let indices: Vec<usize> = if self.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                let tree = RegressionTree::fit(x, y, &indices, &params, &mut rng);
                let mut bag = indices;
                bag.sort_unstable();
                bag.dedup();
                (tree, bag)
            })
            .collect();

        let (trees, in_bag) = grown.into_iter().unzip();
        Ok(FittedModel::Forest(RandomForest { trees, in_bag }))
    }
}
