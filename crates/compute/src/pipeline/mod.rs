//! Feature pipeline orchestrator.
//!
//! Wires the stages together for a train and a test frame:
//!
//! - **prepare**: covariate merge, clean-flag filter, numeric coercion
//! - **impute**: (entity, month) -> entity -> global mean cascade
//! - **features**: calendar fields, per-entity lags and rolling means
//! - **align**: shared model-input columns and final gap fill

pub mod align;
pub mod anomaly;
pub mod features;
pub mod impute;
pub mod metrics;

use chrono::NaiveDate;
use nalgebra::DMatrix;
use tracing::{debug, info};
use voltwatch_core::{Frame, PipelineConfig};
use voltwatch_ingest::{filter_clean, merge_covariates};

use crate::error::{ComputeError, ComputeResult};

use self::align::align;
use self::features::add_time_features;
use self::impute::{impute, ImputationSummary};
use self::metrics::PipelineMetrics;

/// Raw input tables for one run.
#[derive(Debug, Clone, Default)]
pub struct RawFrames {
    pub train: Frame,
    pub test: Frame,
    /// Auxiliary tables (weather, population, services), merged in order.
    pub covariates: Vec<(String, Frame)>,
}

impl RawFrames {
    pub fn new(train: Frame, test: Frame) -> Self {
        Self {
            train,
            test,
            covariates: Vec::new(),
        }
    }

    pub fn with_covariate(mut self, name: impl Into<String>, frame: Frame) -> Self {
        self.covariates.push((name.into(), frame));
        self
    }
}

/// One frame after alignment: the sorted feature frame plus the dense model
/// input derived from it.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub target_column: String,
    /// Entity per row.
    pub entities: Vec<Option<String>>,
    /// Timestamp per row.
    pub timestamps: Vec<Option<NaiveDate>>,
    /// Full feature frame, sorted by (entity, timestamp).
    pub frame: Frame,
    /// Model-input columns, lexicographic.
    pub feature_columns: Vec<String>,
    /// Model input, one row per frame row, no missing values.
    pub matrix: DMatrix<f64>,
    /// Target after coercion and the configured target policy.
    pub target: Vec<f64>,
    /// Whether the target was present before filling.
    pub target_observed: Vec<bool>,
}

impl FeatureSet {
    pub fn rows(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// Distinct entities, sorted.
    pub fn entities(&self) -> Vec<String> {
        let mut out: Vec<String> = self.entities.iter().flatten().cloned().collect();
        out.sort();
        out.dedup();
        out
    }

    /// Row indices of one entity, in timestamp order.
    pub fn rows_for(&self, entity: &str) -> Vec<usize> {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.as_deref() == Some(entity))
            .map(|(i, _)| i)
            .collect()
    }

    /// Model input for `rows`, re-aligned to `columns` by name. A column the
    /// set does not carry is a schema mismatch.
    pub fn select(&self, rows: &[usize], columns: &[String], stage: &str) -> ComputeResult<DMatrix<f64>> {
        let positions = columns
            .iter()
            .map(|name| {
                self.feature_columns
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| ComputeError::Schema(self.frame.schema_error(name, stage)))
            })
            .collect::<ComputeResult<Vec<usize>>>()?;
        Ok(DMatrix::from_fn(rows.len(), positions.len(), |i, j| {
            self.matrix[(rows[i], positions[j])]
        }))
    }
}

/// Merge covariates, apply the clean filter and coerce value columns.
pub fn prepare_frame(frame: &Frame, covariates: &[(String, Frame)], config: &PipelineConfig) -> ComputeResult<Frame> {
    let mut out = frame.clone();
    for (name, right) in covariates {
        out = merge_covariates(&out, right, &config.timestamp_column, &config.entity_column)?;
        debug!(covariate = %name, shape = ?out.shape(), "covariate merged");
    }

    if let Some(flag) = &config.clean_flag_column {
        out = filter_clean(&out, flag)?;
    }

    let value_columns: Vec<String> = out
        .column_names()
        .into_iter()
        .filter(|c| *c == config.target_column || c.ends_with("_MWh"))
        .collect();
    for name in value_columns {
        let lost = out.coerce_numeric(&name)?;
        if lost > 0 {
            debug!(column = %name, cells = lost, "non-numeric values coerced to missing");
        }
    }
    Ok(out)
}

/// Run one frame through prepare, impute and features.
fn process_frame(
    frame: &Frame,
    covariates: &[(String, Frame)],
    config: &PipelineConfig,
    metrics: &mut PipelineMetrics,
) -> ComputeResult<(Frame, ImputationSummary)> {
    let timer = metrics.timer("prepare");
    let prepared = prepare_frame(frame, covariates, config)?;
    timer.finish(metrics, frame.rows(), prepared.rows());

    let timer = metrics.timer("impute");
    let (imputed, summary) = impute(&prepared, config)?;
    timer.finish(metrics, prepared.rows(), imputed.rows());
    metrics.cells_imputed += summary.total_filled() as u64;

    let timer = metrics.timer("features");
    let featured = add_time_features(&imputed, config)?;
    timer.finish(metrics, imputed.rows(), featured.rows());

    Ok((featured, summary))
}

/// Raw tables to aligned (train, test) feature sets.
pub fn run_pipeline(raw: &RawFrames, config: &PipelineConfig) -> ComputeResult<(FeatureSet, FeatureSet)> {
    let mut metrics = PipelineMetrics::new();
    run_pipeline_with_metrics(raw, config, &mut metrics)
}

pub fn run_pipeline_with_metrics(
    raw: &RawFrames,
    config: &PipelineConfig,
    metrics: &mut PipelineMetrics,
) -> ComputeResult<(FeatureSet, FeatureSet)> {
    if raw.train.is_empty() {
        return Err(ComputeError::EmptyInput("train frame has no rows".into()));
    }

    let (train, train_summary) = process_frame(&raw.train, &raw.covariates, config, metrics)?;
    let (test, test_summary) = process_frame(&raw.test, &raw.covariates, config, metrics)?;

    let timer = metrics.timer("align");
    let (train_set, test_set) = align(&train, &test, config)?;
    timer.finish(metrics, train.rows() + test.rows(), train_set.rows() + test_set.rows());

    info!(
        target = %config.target_column,
        train_rows = train_set.rows(),
        test_rows = test_set.rows(),
        features = train_set.feature_columns.len(),
        imputed = train_summary.total_filled() + test_summary.total_filled(),
        "pipeline complete"
    );
    Ok((train_set, test_set))
}
