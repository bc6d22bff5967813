//! Calendar and per-entity temporal features.
//!
//! The frame is re-sorted by (entity, timestamp) before any lag or rolling
//! computation; rows missing either key sort last and get no lag/rolling
//! values. Lags and rolling means are window expressions partitioned by
//! entity.

use polars::prelude::*;
use tracing::debug;
use voltwatch_core::{Frame, PipelineConfig, RollingPolicy};

use crate::error::ComputeResult;

pub const STAGE: &str = "features";

pub fn lag_column(target: &str, k: usize) -> String {
    format!("{target}_lag{k}")
}

pub fn roll_column(target: &str, w: usize) -> String {
    format!("{target}_roll{w}")
}

/// Add `year`, `month`, `quarter`, `<target>_lag<k>` and `<target>_roll<w>`.
/// Returns the frame re-sorted by (entity, timestamp).
pub fn add_time_features(frame: &Frame, config: &PipelineConfig) -> ComputeResult<Frame> {
    let entity = config.entity_column.as_str();
    let ts = config.timestamp_column.as_str();
    let target = config.target_column.as_str();
    frame.require_dtype(target, STAGE, &DataType::Float64)?;
    frame.require_dtype(entity, STAGE, &DataType::String)?;
    frame.require_dtype(ts, STAGE, &DataType::Date)?;

    let keyed = col(entity).is_not_null().and(col(ts).is_not_null());
    let per_entity = |expr: Expr| when(keyed.clone()).then(expr.over([col(entity)])).otherwise(lit(NULL));

    let mut features = vec![
        col(ts).dt().year().cast(DataType::Float64).alias("year"),
        col(ts).dt().month().cast(DataType::Float64).alias("month"),
        col(ts).dt().quarter().cast(DataType::Float64).alias("quarter"),
    ];
    for &k in &config.lags {
        let shifted = col(target).shift(lit(k as i64));
        features.push(per_entity(shifted).alias(lag_column(target, k)));
    }
    for &w in &config.rolling_windows {
        let rolled = col(target).rolling_mean(RollingOptionsFixedWindow {
            window_size: w,
            min_periods: config.rolling_policy.min_periods(w).max(1),
            weights: None,
            center: false,
            fn_params: None,
        });
        features.push(per_entity(rolled).alias(roll_column(target, w)));
    }

    let sorted = frame
        .lazy()
        .sort(
            [entity, ts],
            SortMultipleOptions::default()
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .with_columns(features)
        .collect()?;
    let out = Frame::from(sorted);

    debug!(
        rows = out.rows(),
        entities = out.require(entity, STAGE)?.n_unique()?,
        lags = ?config.lags,
        windows = ?config.rolling_windows,
        strict = config.rolling_policy == RollingPolicy::Strict,
        "time features added"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use voltwatch_core::{date_column, float_column, text_column, CoreError};

    use super::*;
    use crate::error::ComputeError;

    fn d(y: i32, m: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, 1)
    }

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    /// Two entities, rows deliberately shuffled.
    fn sample() -> Frame {
        Frame::from_columns(vec![
            text_column("Sehir", vec![s("B"), s("A"), s("A"), s("B"), s("A"), s("A")]),
            date_column("Donem", &[d(2023, 2), d(2023, 3), d(2023, 1), d(2023, 1), d(2023, 4), d(2023, 2)]).unwrap(),
            float_column(
                "Genel_Toplam_MWh",
                vec![Some(20.0), Some(3.0), Some(1.0), Some(10.0), Some(4.0), Some(2.0)],
            ),
        ])
        .unwrap()
    }

    fn config(policy: RollingPolicy) -> PipelineConfig {
        PipelineConfig {
            lags: vec![1, 2],
            rolling_windows: vec![2],
            rolling_policy: policy,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn sorts_by_entity_then_date() {
        let out = add_time_features(&sample(), &config(RollingPolicy::Strict)).unwrap();
        let target = out.floats("Genel_Toplam_MWh", "t").unwrap();
        assert_eq!(
            target,
            &[Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(10.0), Some(20.0)]
        );
        assert_eq!(out.floats("quarter", "t").unwrap()[3], Some(2.0));
        assert_eq!(out.floats("year", "t").unwrap()[0], Some(2023.0));
    }

    #[test]
    fn lags_stay_within_entity() {
        let out = add_time_features(&sample(), &config(RollingPolicy::Strict)).unwrap();
        let lag1 = out.floats("Genel_Toplam_MWh_lag1", "t").unwrap();
        assert_eq!(lag1, &[None, Some(1.0), Some(2.0), Some(3.0), None, Some(10.0)]);
        let lag2 = out.floats("Genel_Toplam_MWh_lag2", "t").unwrap();
        assert_eq!(lag2, &[None, None, Some(1.0), Some(2.0), None, None]);
    }

    #[test]
    fn strict_rolling_needs_full_window() {
        let out = add_time_features(&sample(), &config(RollingPolicy::Strict)).unwrap();
        let roll = out.floats("Genel_Toplam_MWh_roll2", "t").unwrap();
        assert_eq!(roll, &[None, Some(1.5), Some(2.5), Some(3.5), None, Some(15.0)]);
    }

    #[test]
    fn relaxed_rolling_uses_partial_window() {
        let out = add_time_features(&sample(), &config(RollingPolicy::Relaxed)).unwrap();
        let roll = out.floats("Genel_Toplam_MWh_roll2", "t").unwrap();
        assert_eq!(roll[0], Some(1.0));
        assert_eq!(roll[4], Some(10.0));
    }

    /// One entity with `values.len()` consecutive months.
    fn single_entity(values: Vec<Option<f64>>) -> Frame {
        let n = values.len();
        let dates: Vec<_> = (0..n as i32).map(|i| d(2015 + i / 12, (i % 12) as u32 + 1)).collect();
        Frame::from_columns(vec![
            text_column("Sehir", vec![s("A"); n]),
            date_column("Donem", &dates).unwrap(),
            float_column("Genel_Toplam_MWh", values),
        ])
        .unwrap()
    }

    #[test]
    fn lag_matches_shift_property() {
        let values: Vec<Option<f64>> = (0..30).map(|i| Some((i * i) as f64)).collect();
        let cfg = PipelineConfig {
            lags: vec![1, 2, 3, 12],
            rolling_windows: Vec::new(),
            ..PipelineConfig::default()
        };
        let out = add_time_features(&single_entity(values.clone()), &cfg).unwrap();
        for k in [1, 2, 3, 12] {
            let lagged = out.floats(&lag_column("Genel_Toplam_MWh", k), "t").unwrap();
            for i in 0..30 {
                if i < k {
                    assert_eq!(lagged[i], None);
                } else {
                    assert_eq!(lagged[i], values[i - k]);
                }
            }
        }
    }

    #[test]
    fn strict_rolling_matches_window_mean() {
        let values: Vec<Option<f64>> = (0..40).map(|i| Some(((i * 7) % 11) as f64 + 0.5)).collect();
        let cfg = PipelineConfig {
            lags: Vec::new(),
            rolling_windows: vec![3, 12],
            rolling_policy: RollingPolicy::Strict,
            ..PipelineConfig::default()
        };
        let out = add_time_features(&single_entity(values.clone()), &cfg).unwrap();
        for w in [3, 12] {
            let rolled = out.floats(&roll_column("Genel_Toplam_MWh", w), "t").unwrap();
            for i in 0..40 {
                if i + 1 < w {
                    assert_eq!(rolled[i], None);
                } else {
                    let expected: f64 = values[i + 1 - w..=i].iter().flatten().sum::<f64>() / w as f64;
                    assert!((rolled[i].unwrap() - expected).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn rolling_skips_missing_values() {
        let cfg = PipelineConfig {
            lags: Vec::new(),
            rolling_windows: vec![3],
            ..PipelineConfig::default()
        };
        let out = add_time_features(&single_entity(vec![Some(1.0), None, Some(3.0)]), &cfg).unwrap();
        assert_eq!(
            out.floats("Genel_Toplam_MWh_roll3", "t").unwrap(),
            vec![Some(1.0), Some(1.0), Some(2.0)]
        );
    }

    #[test]
    fn missing_target_is_schema_error() {
        let mut f = sample();
        f.remove("Genel_Toplam_MWh");
        let err = add_time_features(&f, &config(RollingPolicy::Strict)).unwrap_err();
        assert!(matches!(
            err,
            ComputeError::Schema(CoreError::SchemaMismatch { ref column, rows: 6, cols: 2, .. })
                if column == "Genel_Toplam_MWh"
        ));
    }

    #[test]
    fn rows_without_keys_sort_last() {
        let f = Frame::from_columns(vec![
            text_column("Sehir", vec![None, s("A"), s("A")]),
            date_column("Donem", &[d(2023, 1), None, d(2023, 1)]).unwrap(),
            float_column("Genel_Toplam_MWh", vec![Some(9.0), Some(8.0), Some(7.0)]),
        ])
        .unwrap();
        let out = add_time_features(&f, &config(RollingPolicy::Relaxed)).unwrap();
        assert_eq!(
            out.floats("Genel_Toplam_MWh", "t").unwrap(),
            &[Some(7.0), Some(8.0), Some(9.0)]
        );
        let lag1 = out.floats("Genel_Toplam_MWh_lag1", "t").unwrap();
        assert_eq!(lag1, &[None, None, None]);
    }
}
