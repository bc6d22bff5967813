//! Anomaly scoring.
//!
//! Two independent signals over the same serving rows:
//! - [`residual`]: robust MAD z-score of model residuals per entity
//! - [`baseline`]: tolerance band around the (entity, month) historical mean
//!
//! [`population`] holds the shared statistics.

pub mod baseline;
pub mod population;
pub mod residual;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use baseline::{score_baseline, SeasonalBaseline, BASELINE_EPSILON};
pub use residual::{mad_flags, robust_z, score_residuals, Observation, MAD_SCALE};

/// Scorer-specific values attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ScoreDetail {
    Residual {
        residual: f64,
        /// `None` when the MAD of the batch is degenerate.
        robust_z: Option<f64>,
        median: Option<f64>,
        mad: Option<f64>,
        threshold: f64,
    },
    Baseline {
        lower: Option<f64>,
        upper: Option<f64>,
        tolerance: f64,
    },
}

impl ScoreDetail {
    pub fn method(&self) -> &'static str {
        match self {
            ScoreDetail::Residual { .. } => "residual",
            ScoreDetail::Baseline { .. } => "baseline",
        }
    }
}

/// One scored serving row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub entity: String,
    pub timestamp: Option<NaiveDate>,
    /// Consumption category the row was scored under.
    pub category: Option<String>,
    pub actual: f64,
    /// Prediction (residual scorer) or seasonal baseline (baseline scorer).
    pub expected: Option<f64>,
    /// Residual, or deviation fraction from the baseline.
    pub deviation: Option<f64>,
    pub is_anomaly: bool,
    pub detail: ScoreDetail,
}

/// Totals for one scorer's output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScorerSummary {
    pub rows: usize,
    pub anomalies: usize,
    pub anomaly_ratio: f64,
}

impl ScorerSummary {
    pub fn of(records: &[AnomalyRecord]) -> Self {
        let rows = records.len();
        let anomalies = records.iter().filter(|r| r.is_anomaly).count();
        let anomaly_ratio = if rows == 0 { 0.0 } else { anomalies as f64 / rows as f64 };
        Self {
            rows,
            anomalies,
            anomaly_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(flag: bool) -> AnomalyRecord {
        AnomalyRecord {
            entity: "A".into(),
            timestamp: NaiveDate::from_ymd_opt(2023, 1, 1),
            category: None,
            actual: 1.0,
            expected: Some(1.0),
            deviation: Some(0.0),
            is_anomaly: flag,
            detail: ScoreDetail::Baseline {
                lower: Some(0.9),
                upper: Some(1.1),
                tolerance: 0.1,
            },
        }
    }

    #[test]
    fn summary_counts_and_ratio() {
        let s = ScorerSummary::of(&[record(true), record(false), record(false), record(false)]);
        assert_eq!(s.rows, 4);
        assert_eq!(s.anomalies, 1);
        assert!((s.anomaly_ratio - 0.25).abs() < 1e-12);
        assert_eq!(ScorerSummary::of(&[]).anomaly_ratio, 0.0);
    }

    #[test]
    fn detail_is_tagged_by_method() {
        let json = serde_json::to_value(record(false)).unwrap();
        assert_eq!(json["detail"]["method"], "baseline");
        assert_eq!(record(false).detail.method(), "baseline");
    }
}
