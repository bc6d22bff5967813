//! Train/test feature alignment.
//!
//! Both frames expose the same lexicographically ordered model-input columns:
//! numeric columns present in both, minus keys, the target and artifact
//! columns. Residual gaps are mean-filled per column using each frame's own
//! means (train fills train, test fills test).

use std::collections::BTreeSet;

use nalgebra::DMatrix;
use polars::prelude::*;
use tracing::{debug, warn};
use voltwatch_core::{Frame, PipelineConfig, TargetPolicy};

use super::FeatureSet;
use crate::error::{ComputeError, ComputeResult};

/// Columns that never enter model input even when numeric.
pub fn is_excluded(name: &str, config: &PipelineConfig) -> bool {
    name == config.target_column
        || name == config.entity_column
        || name == config.timestamp_column
        || name == "index"
        || name == "level_0"
        || name.ends_with("_right")
        || config.extra_exclusions.iter().any(|e| e == name)
        || config.categories.values().any(|c| c == name)
}

/// Sorted model-input columns shared by both frames.
pub fn common_feature_columns(train: &Frame, test: &Frame, config: &PipelineConfig) -> Vec<String> {
    let train_cols: BTreeSet<String> = train.numeric_columns().into_iter().collect();
    let test_cols: BTreeSet<String> = test.numeric_columns().into_iter().collect();
    train_cols
        .intersection(&test_cols)
        .filter(|c| !is_excluded(c, config))
        .cloned()
        .collect()
}

/// Build aligned feature sets for a train and a test frame.
pub fn align(train: &Frame, test: &Frame, config: &PipelineConfig) -> ComputeResult<(FeatureSet, FeatureSet)> {
    let train = prepare_target(train, config, "train")?;
    let test = prepare_target(test, config, "test")?;

    let columns = common_feature_columns(&train, &test, config);
    if columns.is_empty() {
        warn!("no numeric feature columns shared by train and test");
    }

    let train_set = build_set(train, &columns, config, "train")?;
    let test_set = build_set(test, &columns, config, "test")?;
    debug!(
        features = columns.len(),
        train_rows = train_set.rows(),
        test_rows = test_set.rows(),
        "features aligned"
    );
    Ok((train_set, test_set))
}

/// Check keys, coerce the target and apply the drop-rows policy.
fn prepare_target(frame: &Frame, config: &PipelineConfig, stage: &str) -> ComputeResult<Frame> {
    frame.require(&config.entity_column, stage)?;
    frame.require(&config.timestamp_column, stage)?;
    frame.require(&config.target_column, stage)?;

    let mut frame = frame.clone();
    let lost = frame.coerce_numeric(&config.target_column)?;
    if lost > 0 {
        warn!(stage, rows = lost, column = %config.target_column, "unparseable target values set to missing");
    }

    if config.target_policy == TargetPolicy::DropRows {
        let before = frame.rows();
        frame = Frame::from(
            frame
                .lazy()
                .filter(col(&config.target_column).is_not_null())
                .collect()?,
        );
        if frame.rows() < before {
            debug!(stage, dropped = before - frame.rows(), "rows without target dropped");
        }
    }
    Ok(frame)
}

fn build_set(frame: Frame, columns: &[String], config: &PipelineConfig, stage: &str) -> ComputeResult<FeatureSet> {
    let rows = frame.rows();
    let target_name = config.target_column.as_str();
    let target_observed: Vec<bool> = frame.floats(target_name, stage)?.iter().map(Option::is_some).collect();
    if rows > 0 && !target_observed.contains(&true) {
        return Err(ComputeError::EmptyInput(format!(
            "no numeric '{target_name}' values in {stage} frame ({rows} rows)"
        )));
    }

    let mut fills = Vec::with_capacity(columns.len() + 1);
    for name in columns {
        if rows > 0 && frame.require_dtype(name, stage, &DataType::Float64)?.null_count() == rows {
            warn!(stage, column = %name, "feature column has no values, filling with 0");
        }
        fills.push(col(name).fill_null(col(name).mean()).fill_null(lit(0.0)));
    }
    fills.push(col(target_name).fill_null(col(target_name).mean()));
    let filled = frame.lazy().select(fills).collect()?;

    let mut values = Vec::with_capacity(rows * columns.len());
    for name in columns {
        values.extend(dense(&filled, name)?);
    }
    let matrix = DMatrix::from_vec(rows, columns.len(), values);
    let target = dense(&filled, target_name)?;

    let entities = frame.texts(&config.entity_column, stage)?;
    let timestamps = frame.dates(&config.timestamp_column, stage)?;

    Ok(FeatureSet {
        target_column: config.target_column.clone(),
        entities,
        timestamps,
        frame,
        feature_columns: columns.to_vec(),
        matrix,
        target,
        target_observed,
    })
}

/// A filled float column as plain values.
fn dense(df: &DataFrame, name: &str) -> ComputeResult<Vec<f64>> {
    let series = df.column(name)?.as_materialized_series();
    Ok(series.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}
