use voltwatch_compute::{BatchRunner, MemoryModelStore, ModelKey, ModelRegistry, ModelStore, RawFrames, SharedRegistry};

use crate::helpers::{energy_frame, linear_config};

#[test]
fn test_train_store_then_score() {
    let frame = energy_frame(&[("Ankara", 1000.0, 36), ("Bursa", 2000.0, 36)], true);
    let raw = RawFrames::new(frame.clone(), frame);
    let runner = BatchRunner::new(linear_config());

    let trained = runner.train(&raw).unwrap();
    assert_eq!(trained.models.len(), 2);
    assert!(trained.skipped.is_empty());

    let store = MemoryModelStore::new();
    store.save_all(&trained.models).unwrap();
    let registry = store.load_registry().unwrap();

    let scored = runner.score(&raw, &registry).unwrap();
    let (detected, _) = runner.detect(&raw).unwrap();
    let a: Vec<_> = scored.residual.iter().map(|r| (r.entity.clone(), r.timestamp, r.is_anomaly)).collect();
    let b: Vec<_> = detected.residual.iter().map(|r| (r.entity.clone(), r.timestamp, r.is_anomaly)).collect();
    assert_eq!(a, b);
}

#[test]
fn test_score_without_models_skips_every_entity() {
    let frame = energy_frame(&[("Ankara", 1000.0, 36)], false);
    let raw = RawFrames::new(frame.clone(), frame);
    let report = BatchRunner::new(linear_config()).score(&raw, &ModelRegistry::new()).unwrap();
    assert!(report.residual.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].reason, "no trained model");
    assert_eq!(report.baseline.len(), 36);
}

#[test]
fn test_retrain_replaces_registry_wholesale() {
    let runner = BatchRunner::new(linear_config());
    let first = energy_frame(&[("Ankara", 1000.0, 36)], false);
    let second = energy_frame(&[("Ankara", 1000.0, 36), ("Bursa", 2000.0, 36)], false);

    let shared = SharedRegistry::new(ModelRegistry::from_models(
        runner.train(&RawFrames::new(first.clone(), first)).unwrap().models,
    ));
    let serving = shared.snapshot();

    shared.replace(ModelRegistry::from_models(
        runner.train(&RawFrames::new(second.clone(), second)).unwrap().models,
    ));

    assert_eq!(serving.len(), 1);
    assert_eq!(shared.snapshot().len(), 2);
    assert!(shared.snapshot().get(&ModelKey::new("total", "Bursa")).is_some());
}
