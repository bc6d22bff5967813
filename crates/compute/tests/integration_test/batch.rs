use indexmap::IndexMap;
use voltwatch_compute::{BatchRunner, ComputeError, RawFrames, ReportFilter, ALL_ENTITIES};

use crate::helpers::{energy_frame, forest_config, linear_config, month_start, SPIKE_ENTITY, SPIKE_INDEX};

#[test]
fn test_short_entity_is_skipped_and_batch_continues() {
    let frame = energy_frame(&[("Ankara", 1000.0, 36), ("Corum", 500.0, 10), ("Bursa", 2000.0, 36)], true);
    let raw = RawFrames::new(frame.clone(), frame);
    let (report, registry) = BatchRunner::new(linear_config()).detect(&raw).unwrap();

    assert_eq!(registry.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    let skipped = &report.skipped[0];
    assert_eq!(skipped.entity, "Corum");
    assert!(skipped.reason.contains("10 training rows"), "{}", skipped.reason);
    assert!(report.residual.iter().all(|r| r.entity != "Corum"));
    // the baseline scorer needs no model
    assert!(report.baseline.iter().any(|r| r.entity == "Corum"));
    assert_eq!(report.metrics.entities_skipped, 1);
}

#[test]
fn test_forest_detect_is_deterministic() {
    let frame = energy_frame(&[("Ankara", 1000.0, 36), ("Bursa", 2000.0, 36)], true);
    let raw = RawFrames::new(frame.clone(), frame);
    let runner = BatchRunner::new(forest_config());
    let (first, _) = runner.detect(&raw).unwrap();
    let (second, _) = runner.detect(&raw).unwrap();

    let a: Vec<_> = first.residual.iter().map(|r| r.expected).collect();
    let b: Vec<_> = second.residual.iter().map(|r| r.expected).collect();
    assert_eq!(a, b);
}

#[test]
fn test_report_filter_narrows_output() {
    let frame = energy_frame(&[("Ankara", 1000.0, 36), ("Bursa", 2000.0, 36)], true);
    let raw = RawFrames::new(frame.clone(), frame);
    let (report, _) = BatchRunner::new(linear_config()).detect(&raw).unwrap();

    let filter = ReportFilter {
        entity: Some(SPIKE_ENTITY.into()),
        start: Some(month_start(SPIKE_INDEX)),
        end: Some(month_start(SPIKE_INDEX)),
        anomalies_only: true,
    };
    let narrowed = report.clone().filtered(&filter).unwrap();
    assert_eq!(narrowed.residual.len(), 1);
    assert_eq!(narrowed.baseline.len(), 1);

    let err = report
        .filtered(&ReportFilter {
            entity: Some("Bursaa".into()),
            ..ReportFilter::default()
        })
        .unwrap_err();
    assert!(matches!(err, ComputeError::UnknownEntity { ref suggestions, .. } if suggestions == &["Bursa".to_string()]));
}

#[test]
fn test_config_date_range_limits_report_rows() {
    let frame = energy_frame(&[("Ankara", 1000.0, 36), ("Bursa", 2000.0, 36)], false);
    let raw = RawFrames::new(frame.clone(), frame);
    let mut config = linear_config();
    config.start = Some(month_start(24));
    let (report, _) = BatchRunner::new(config).detect(&raw).unwrap();
    assert_eq!(report.baseline.len(), 24);
    assert!(report.residual.iter().all(|r| r.timestamp >= Some(month_start(24))));
}

#[test]
fn test_missing_target_column_is_fatal() {
    let mut frame = energy_frame(&[("Ankara", 1000.0, 36)], false);
    frame.remove("Genel_Toplam_MWh");
    let raw = RawFrames::new(frame.clone(), frame);
    let err = BatchRunner::new(linear_config()).detect(&raw).unwrap_err();
    assert!(err.to_string().contains("'Genel_Toplam_MWh' missing"), "{err}");
}

#[test]
fn test_missing_category_column_is_skipped_in_multi_target_run() {
    let frame = energy_frame(&[("Ankara", 1000.0, 36)], false);
    let raw = RawFrames::new(frame.clone(), frame);
    let mut config = linear_config();
    config.categories = IndexMap::from([
        ("total".to_string(), "Genel_Toplam_MWh".to_string()),
        ("mesken".to_string(), "Mesken_MWh".to_string()),
    ]);
    let (report, registry) = BatchRunner::new(config).detect(&raw).unwrap();

    assert_eq!(registry.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    let skipped = &report.skipped[0];
    assert_eq!(skipped.category, "mesken");
    assert_eq!(skipped.entity, ALL_ENTITIES);
    assert!(skipped.reason.contains("'Mesken_MWh' missing"), "{}", skipped.reason);
    assert_eq!(report.residual.len(), 36);
    assert_eq!(report.metrics.entities_skipped, 1);
}

#[test]
fn test_baseline_only_run_matches_detect_baseline() {
    let frame = energy_frame(&[("Ankara", 1000.0, 36), ("Corum", 500.0, 10)], true);
    let raw = RawFrames::new(frame.clone(), frame);
    let runner = BatchRunner::new(linear_config());
    let only = runner.baseline(&raw).unwrap();
    let (full, _) = runner.detect(&raw).unwrap();

    assert!(only.residual.is_empty());
    assert!(only.skipped.is_empty());
    assert_eq!(only.baseline, full.baseline);
    assert_eq!(only.summary.baseline, full.summary.baseline);
    assert!(only
        .baseline
        .iter()
        .any(|r| r.entity == SPIKE_ENTITY && r.timestamp == Some(month_start(SPIKE_INDEX)) && r.is_anomaly));
}
