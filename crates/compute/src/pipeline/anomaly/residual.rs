//! Robust residual scoring.
//!
//! `z = 0.6745 * (r - median) / MAD`; a row is anomalous when `|z|` exceeds
//! the threshold. A degenerate batch (fewer than two residuals, or MAD zero
//! or not finite) flags nothing.

use std::cmp::Ordering;

use chrono::NaiveDate;
use tracing::debug;
use voltwatch_core::CoreError;

use super::population::{mad, median};
use super::{AnomalyRecord, ScoreDetail};
use crate::error::ComputeResult;

/// Consistency constant relating MAD to the normal standard deviation.
pub const MAD_SCALE: f64 = 0.6745;

/// A labelled serving row.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub entity: String,
    pub timestamp: Option<NaiveDate>,
    pub actual: f64,
}

/// Median, MAD and z-scores of a residual batch, `None` when degenerate.
fn robust_stats(residuals: &[f64]) -> Option<(f64, f64, Vec<f64>)> {
    if residuals.len() < 2 {
        return None;
    }
    let center = median(residuals)?;
    let spread = mad(residuals, center)?;
    if !spread.is_finite() || spread == 0.0 {
        return None;
    }
    let z = residuals.iter().map(|r| MAD_SCALE * (r - center) / spread).collect();
    Some((center, spread, z))
}

/// Robust z-score per residual, `None` for a degenerate batch.
pub fn robust_z(residuals: &[f64]) -> Option<Vec<f64>> {
    robust_stats(residuals).map(|(_, _, z)| z)
}

/// Anomaly flag per residual. Same length as the input.
pub fn mad_flags(residuals: &[f64], threshold: f64) -> Vec<bool> {
    match robust_z(residuals) {
        Some(z) => z.iter().map(|z| z.abs() > threshold).collect(),
        None => vec![false; residuals.len()],
    }
}

/// Score observations against predictions. Output is sorted by timestamp.
pub fn score_residuals(
    observations: &[Observation],
    predictions: &[f64],
    threshold: f64,
) -> ComputeResult<Vec<AnomalyRecord>> {
    if observations.len() != predictions.len() {
        return Err(CoreError::LengthMismatch {
            column: "prediction".into(),
            expected: observations.len(),
            actual: predictions.len(),
        }
        .into());
    }

    let residuals: Vec<f64> = observations
        .iter()
        .zip(predictions)
        .map(|(o, p)| o.actual - p)
        .collect();
    let stats = robust_stats(&residuals);
    if stats.is_none() && !residuals.is_empty() {
        debug!(rows = residuals.len(), "degenerate residual spread, nothing flagged");
    }

    let mut records: Vec<AnomalyRecord> = observations
        .iter()
        .zip(predictions)
        .zip(&residuals)
        .enumerate()
        .map(|(i, ((obs, &pred), &residual))| {
            let z = stats.as_ref().map(|(_, _, z)| z[i]);
            AnomalyRecord {
                entity: obs.entity.clone(),
                timestamp: obs.timestamp,
                category: None,
                actual: obs.actual,
                expected: Some(pred),
                deviation: Some(residual),
                is_anomaly: z.is_some_and(|z| z.abs() > threshold),
                detail: ScoreDetail::Residual {
                    residual,
                    robust_z: z,
                    median: stats.as_ref().map(|s| s.0),
                    mad: stats.as_ref().map(|s| s.1),
                    threshold,
                },
            }
        })
        .collect();

    records.sort_by(|a, b| match (a.timestamp, b.timestamp) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    Ok(records)
}
