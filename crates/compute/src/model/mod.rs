//! Per-entity regressors and trained model records.
//!
//! Every regressor sits behind [`Regressor`]; the fitted output is a
//! serializable [`FittedModel`] so the batch runner and the model store never
//! depend on a concrete algorithm.

pub mod forest;
pub mod linear;
pub mod registry;
pub mod store;
pub mod trainer;
pub mod tree;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use voltwatch_core::{ModelKind, PipelineConfig};

use crate::error::ComputeResult;
use crate::pipeline::FeatureSet;

pub use forest::{ForestRegressor, RandomForest};
pub use linear::{LinearModel, LinearRegressor};
pub use registry::{ModelRegistry, SharedRegistry};
pub use store::{MemoryModelStore, ModelHandle, ModelStore};
pub use trainer::{train_entity, SkippedEntity, Trainer, ALL_ENTITIES};

/// Fit/predict capability shared by all regressors.
pub trait Regressor: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Fit on `x` (one row per sample) against `y`.
    fn fit(&self, x: &DMatrix<f64>, y: &[f64]) -> ComputeResult<FittedModel>;

    fn predict(&self, model: &FittedModel, x: &DMatrix<f64>) -> Vec<f64> {
        model.predict(x)
    }
}

/// Regressor selected by the pipeline configuration.
pub fn regressor_for(config: &PipelineConfig) -> Box<dyn Regressor> {
    match config.model.kind {
        ModelKind::RandomForest => Box::new(ForestRegressor::from_config(&config.model, config.seed)),
        ModelKind::Linear => Box::new(LinearRegressor::from_config(&config.model)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedModel {
    Forest(RandomForest),
    Linear(LinearModel),
}

impl FittedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            FittedModel::Forest(_) => ModelKind::RandomForest,
            FittedModel::Linear(_) => ModelKind::Linear,
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        match self {
            FittedModel::Forest(m) => m.predict_row(row),
            FittedModel::Linear(m) => m.predict_row(row),
        }
    }

    pub fn predict(&self, x: &DMatrix<f64>) -> Vec<f64> {
        x.row_iter()
            .map(|r| {
                let row: Vec<f64> = r.iter().copied().collect();
                self.predict_row(&row)
            })
            .collect()
    }

    /// Prediction for fit row `index` from the part of the model that did
    /// not learn from it. Linear models have no such part and predict as usual.
    pub fn predict_held_out(&self, row: &[f64], index: usize) -> f64 {
        match self {
            FittedModel::Forest(m) => m.predict_held_out(row, index),
            FittedModel::Linear(m) => m.predict_row(row),
        }
    }
}

/// Registry key: one model per (category, entity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub category: String,
    pub entity: String,
}

impl ModelKey {
    pub fn new(category: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            entity: entity.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.entity)
    }
}

/// Goodness of fit on a set of labelled rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitMetrics {
    pub n: usize,
    pub r2: f64,
    pub mae: f64,
    pub rmse: f64,
}

impl FitMetrics {
    /// `None` when there is nothing to compare. R² is 0 for a constant target.
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Option<Self> {
        let n = actual.len().min(predicted.len());
        if n == 0 {
            return None;
        }
        let mean = actual[..n].iter().sum::<f64>() / n as f64;
        let mut abs = 0.0;
        let mut sq = 0.0;
        let mut total = 0.0;
        for (a, p) in actual[..n].iter().zip(&predicted[..n]) {
            abs += (a - p).abs();
            sq += (a - p) * (a - p);
            total += (a - mean) * (a - mean);
        }
        let r2 = if total > 0.0 { 1.0 - sq / total } else { 0.0 };
        Some(Self {
            n,
            r2,
            mae: abs / n as f64,
            rmse: (sq / n as f64).sqrt(),
        })
    }
}

/// A fitted model for one (category, entity) with its input contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub key: ModelKey,
    pub target_column: String,
    /// Fit-time column order; predict input is re-aligned to it by name.
    pub feature_columns: Vec<String>,
    pub model: FittedModel,
    pub train_rows: usize,
    pub trained_at: DateTime<Utc>,
    pub train_metrics: Option<FitMetrics>,
    #[serde(default)]
    pub test_metrics: Option<FitMetrics>,
    /// Timestamp of each row the final model was fitted on, in fit order.
    #[serde(default)]
    pub fit_timestamps: Vec<Option<NaiveDate>>,
    /// Rows dropped before the refit because their held-out residual was
    /// already anomalous.
    #[serde(default)]
    pub excluded: Vec<Option<NaiveDate>>,
}

impl TrainedModel {
    /// Predict `rows` of `set`. A row whose timestamp was part of the fit gets
    /// its held-out prediction. A fit-time column absent from the set is a
    /// schema mismatch for the predict stage.
    pub fn predict(&self, set: &FeatureSet, rows: &[usize]) -> ComputeResult<Vec<f64>> {
        let x = set.select(rows, &self.feature_columns, "predict")?;
        let fitted: HashMap<NaiveDate, usize> = self
            .fit_timestamps
            .iter()
            .enumerate()
            .filter_map(|(j, ts)| ts.map(|d| (d, j)))
            .collect();
        Ok(rows
            .iter()
            .zip(x.row_iter())
            .map(|(&i, r)| {
                let row: Vec<f64> = r.iter().copied().collect();
                match set.timestamps[i].and_then(|d| fitted.get(&d)) {
                    Some(&j) => self.model.predict_held_out(&row, j),
                    None => self.model.predict_row(&row),
                }
            })
            .collect())
    }
}
