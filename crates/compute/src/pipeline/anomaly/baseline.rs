//! Seasonal baseline scoring.
//!
//! The baseline for (entity, calendar month) is the mean training target of
//! that group. A serving row is anomalous when its actual value leaves the
//! inclusive band `[b * (1 - tol), b * (1 + tol)]`.

use polars::prelude::*;
use tracing::debug;
use voltwatch_core::month_of;

use super::{AnomalyRecord, ScoreDetail};
use crate::error::ComputeResult;
use crate::pipeline::FeatureSet;

/// Stand-in for a zero baseline when computing the deviation fraction.
pub const BASELINE_EPSILON: f64 = 1e-8;

const ENTITY: &str = "entity";
const MONTH: &str = "month";
const VALUE: &str = "value";
const BASELINE: &str = "baseline";
const ORDER: &str = "order";

/// Historical (entity, month) means, one row per group.
#[derive(Debug, Clone)]
pub struct SeasonalBaseline {
    groups: DataFrame,
}

/// `(entity, month, value)` for the given rows of a set. Rows without a
/// timestamp get a null month.
fn keyed_rows(set: &FeatureSet, rows: &[usize]) -> ComputeResult<DataFrame> {
    let entities: Vec<Option<&str>> = rows.iter().map(|&i| set.entities[i].as_deref()).collect();
    let months: Vec<Option<u32>> = rows.iter().map(|&i| set.timestamps[i].map(month_of)).collect();
    let values: Vec<f64> = rows.iter().map(|&i| set.target[i]).collect();
    Ok(DataFrame::new(vec![
        Column::new(ENTITY.into(), entities),
        Column::new(MONTH.into(), months),
        Column::new(VALUE.into(), values),
    ])?)
}

impl SeasonalBaseline {
    /// Group observed training targets by (entity, month).
    pub fn fit(train: &FeatureSet) -> ComputeResult<Self> {
        let observed: Vec<usize> = (0..train.rows()).filter(|&i| train.target_observed[i]).collect();
        let groups = keyed_rows(train, &observed)?
            .lazy()
            .filter(col(ENTITY).is_not_null().and(col(MONTH).is_not_null()))
            .group_by_stable([col(ENTITY), col(MONTH)])
            .agg([col(VALUE).mean().alias(BASELINE)])
            .collect()?;
        Ok(Self { groups })
    }

    pub fn get(&self, entity: &str, month: u32) -> Option<f64> {
        let entities = self.groups.column(ENTITY).ok()?.as_materialized_series().str().ok()?;
        let months = self.groups.column(MONTH).ok()?.as_materialized_series().u32().ok()?;
        let means = self.groups.column(BASELINE).ok()?.as_materialized_series().f64().ok()?;
        entities
            .into_iter()
            .zip(months)
            .zip(means)
            .find(|((e, m), _)| *e == Some(entity) && *m == Some(month))
            .and_then(|(_, mean)| mean)
    }

    pub fn len(&self) -> usize {
        self.groups.height()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.height() == 0
    }

    /// Score one actual value against an optional baseline.
    pub fn evaluate(
        entity: &str,
        timestamp: Option<chrono::NaiveDate>,
        actual: f64,
        baseline: Option<f64>,
        tolerance: f64,
    ) -> AnomalyRecord {
        let (deviation, lower, upper, is_anomaly) = match baseline {
            Some(b) => {
                let lower = b * (1.0 - tolerance);
                let upper = b * (1.0 + tolerance);
                let safe = if b == 0.0 { BASELINE_EPSILON } else { b };
                let deviation = (actual - b) / safe;
                (Some(deviation), Some(lower), Some(upper), actual < lower || actual > upper)
            }
            None => (None, None, None, false),
        };
        AnomalyRecord {
            entity: entity.to_string(),
            timestamp,
            category: None,
            actual,
            expected: baseline,
            deviation,
            is_anomaly,
            detail: ScoreDetail::Baseline {
                lower,
                upper,
                tolerance,
            },
        }
    }

    /// Score every labelled test row, in the set's (entity, timestamp) order.
    pub fn score(&self, test: &FeatureSet, tolerance: f64) -> ComputeResult<Vec<AnomalyRecord>> {
        let rows: Vec<usize> = (0..test.rows())
            .filter(|&i| test.target_observed[i] && test.entities[i].is_some())
            .collect();
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let joined = keyed_rows(test, &rows)?
            .lazy()
            .with_row_index(ORDER, None)
            .join(
                self.groups.clone().lazy(),
                [col(ENTITY), col(MONTH)],
                [col(ENTITY), col(MONTH)],
                JoinArgs::new(JoinType::Left),
            )
            .sort([ORDER], SortMultipleOptions::default())
            .collect()?;
        let baselines: Vec<Option<f64>> =
            joined.column(BASELINE)?.as_materialized_series().f64()?.into_iter().collect();

        let missing = baselines.iter().filter(|b| b.is_none()).count();
        if missing > 0 {
            debug!(rows = missing, "rows without seasonal history left unflagged");
        }
        Ok(rows
            .iter()
            .zip(baselines)
            .map(|(&i, baseline)| {
                let entity = test.entities[i].as_deref().unwrap_or_default();
                Self::evaluate(entity, test.timestamps[i], test.target[i], baseline, tolerance)
            })
            .collect())
    }
}

/// Fit on `train` and score `test`.
pub fn score_baseline(train: &FeatureSet, test: &FeatureSet, tolerance: f64) -> ComputeResult<Vec<AnomalyRecord>> {
    let baseline = SeasonalBaseline::fit(train)?;
    debug!(groups = baseline.len(), tolerance, "seasonal baseline fitted");
    baseline.score(test, tolerance)
}
