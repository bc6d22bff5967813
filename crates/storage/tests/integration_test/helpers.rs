use std::path::PathBuf;

use chrono::Utc;
use uuid::Uuid;
use voltwatch_compute::model::{FitMetrics, FittedModel, LinearModel};
use voltwatch_compute::{ModelKey, TrainedModel};

/// Create a unique temp directory for each test.
pub fn test_model_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("voltwatch-store-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A small linear model: `intercept + slope * (x - 6.5) / 3.45`.
pub fn make_model(category: &str, entity: &str, intercept: f64, slope: f64) -> TrainedModel {
    TrainedModel {
        key: ModelKey::new(category, entity),
        target_column: "Genel_Toplam_MWh".into(),
        feature_columns: vec!["month".into()],
        model: FittedModel::Linear(LinearModel {
            intercept,
            coefficients: vec![slope],
            means: vec![6.5],
            scales: vec![3.45],
            iterations: 3,
        }),
        train_rows: 36,
        trained_at: Utc::now(),
        train_metrics: FitMetrics::compute(&[1.0, 2.0, 3.0], &[1.1, 2.0, 2.9]),
        test_metrics: None,
        fit_timestamps: Vec::new(),
        excluded: Vec::new(),
    }
}
