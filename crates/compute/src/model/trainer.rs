use chrono::Utc;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use voltwatch_core::{PipelineConfig, DEFAULT_CATEGORY};

use super::{regressor_for, FitMetrics, FittedModel, ModelKey, TrainedModel};
use crate::error::{ComputeError, ComputeResult};
use crate::pipeline::anomaly::mad_flags;
use crate::pipeline::FeatureSet;

/// Entity marker for a skip that covers a whole category.
pub const ALL_ENTITIES: &str = "*";

/// An entity left out of a batch, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEntity {
    pub category: String,
    pub entity: String,
    pub reason: String,
}

/// Trains one model per entity for a single category.
#[derive(Debug, Clone)]
pub struct Trainer {
    pub config: PipelineConfig,
    pub category: String,
}

impl Trainer {
    pub fn new(config: PipelineConfig, category: impl Into<String>) -> Self {
        Self {
            config,
            category: category.into(),
        }
    }

    /// Fit a model on the entity's rows with an observed target.
    pub fn train(&self, features: &FeatureSet, entity: &str) -> ComputeResult<TrainedModel> {
        let rows: Vec<usize> = features
            .rows_for(entity)
            .into_iter()
            .filter(|&i| features.target_observed[i])
            .collect();
        if rows.len() < self.config.min_train_rows {
            return Err(ComputeError::InsufficientData {
                entity: entity.to_string(),
                rows: rows.len(),
                minimum: self.config.min_train_rows,
            });
        }

        let regressor = regressor_for(&self.config);
        let x = features.matrix.select_rows(rows.iter());
        let y: Vec<f64> = rows.iter().map(|&i| features.target[i]).collect();
        let mut model = regressor.fit(&x, &y)?;
        let mut fit_rows = rows.clone();
        let mut excluded = Vec::new();

        if self.config.model.robust_refit {
            let flags = mad_flags(&held_out_residuals(&model, &x, &y), self.config.mad_threshold);
            let kept: Vec<usize> = (0..rows.len()).filter(|&j| !flags[j]).collect();
            let dropped = rows.len() - kept.len();
            if dropped > 0 && kept.len() >= self.config.min_train_rows {
                let kept_x = x.select_rows(kept.iter());
                let kept_y: Vec<f64> = kept.iter().map(|&j| y[j]).collect();
                model = regressor.fit(&kept_x, &kept_y)?;
                excluded = (0..rows.len())
                    .filter(|&j| flags[j])
                    .map(|j| features.timestamps[rows[j]])
                    .collect();
                fit_rows = kept.iter().map(|&j| rows[j]).collect();
                debug!(category = %self.category, entity, dropped, "refitted without anomalous training rows");
            }
        }

        let fit_x = features.matrix.select_rows(fit_rows.iter());
        let fit_y: Vec<f64> = fit_rows.iter().map(|&i| features.target[i]).collect();
        let train_metrics = FitMetrics::compute(&fit_y, &model.predict(&fit_x));

        debug!(
            category = %self.category,
            entity,
            rows = fit_rows.len(),
            r2 = train_metrics.as_ref().map_or(0.0, |m| m.r2),
            "entity model fitted"
        );
        Ok(TrainedModel {
            key: ModelKey::new(self.category.clone(), entity),
            target_column: features.target_column.clone(),
            feature_columns: features.feature_columns.clone(),
            model,
            train_rows: fit_rows.len(),
            trained_at: Utc::now(),
            train_metrics,
            test_metrics: None,
            fit_timestamps: fit_rows.iter().map(|&i| features.timestamps[i]).collect(),
            excluded,
        })
    }

    /// Train every entity in parallel. Results come back in sorted entity
    /// order; entities that fail are reported instead of aborting the batch.
    pub fn train_all(&self, features: &FeatureSet) -> (Vec<TrainedModel>, Vec<SkippedEntity>) {
        let entities = features.entities();
        let results: Vec<(String, ComputeResult<TrainedModel>)> = entities
            .into_par_iter()
            .map(|entity| {
                let result = self.train(features, &entity);
                (entity, result)
            })
            .collect();

        let mut models = Vec::new();
        let mut skipped = Vec::new();
        for (entity, result) in results {
            match result {
                Ok(model) => models.push(model),
                Err(e) => {
                    warn!(category = %self.category, entity = %entity, error = %e, "entity skipped");
                    skipped.push(SkippedEntity {
                        category: self.category.clone(),
                        entity,
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(
            category = %self.category,
            trained = models.len(),
            skipped = skipped.len(),
            "training complete"
        );
        (models, skipped)
    }
}

/// Residuals smaller than this share of the largest target are rounding noise.
const RESIDUAL_FLOOR: f64 = 1e-9;

/// `y - prediction` for every fit row, each predicted without the trees
/// that saw it. Rounding noise is snapped to zero.
fn held_out_residuals(model: &FittedModel, x: &DMatrix<f64>, y: &[f64]) -> Vec<f64> {
    let floor = RESIDUAL_FLOOR * y.iter().fold(1.0_f64, |m, v| m.max(v.abs()));
    x.row_iter()
        .zip(y)
        .enumerate()
        .map(|(j, (r, t))| {
            let row: Vec<f64> = r.iter().copied().collect();
            let residual = t - model.predict_held_out(&row, j);
            if residual.abs() < floor {
                0.0
            } else {
                residual
            }
        })
        .collect()
}

/// Train a single entity under the default category.
pub fn train_entity(features: &FeatureSet, entity: &str, config: &PipelineConfig) -> ComputeResult<TrainedModel> {
    Trainer::new(config.clone(), DEFAULT_CATEGORY).train(features, entity)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use nalgebra::DMatrix;
    use voltwatch_core::{Frame, ModelKind};

    use super::*;

    fn set(counts: &[(&str, usize)]) -> FeatureSet {
        let mut entities = Vec::new();
        let mut timestamps = Vec::new();
        let mut values = Vec::new();
        let mut target = Vec::new();
        for (name, n) in counts {
            for i in 0..*n {
                entities.push(Some(name.to_string()));
                timestamps.push(NaiveDate::from_ymd_opt(2020 + (i / 12) as i32, (i % 12) as u32 + 1, 1));
                values.extend([i as f64, (i % 12) as f64]);
                target.push(100.0 + 2.0 * i as f64);
            }
        }
        let rows = target.len();
        let matrix = DMatrix::from_row_slice(rows, 2, &values);
        FeatureSet {
            target_column: "Genel_Toplam_MWh".into(),
            entities,
            timestamps,
            frame: Frame::new(),
            feature_columns: vec!["t".into(), "month".into()],
            matrix,
            target,
            target_observed: vec![true; rows],
        }
    }

    fn linear() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.model.kind = ModelKind::Linear;
        config
    }

    #[test]
    fn too_few_rows_is_insufficient_data() {
        let err = train_entity(&set(&[("Bursa", 10)]), "Bursa", &PipelineConfig::default()).unwrap_err();
        match err {
            ComputeError::InsufficientData { entity, rows, minimum } => {
                assert_eq!(entity, "Bursa");
                assert_eq!(rows, 10);
                assert_eq!(minimum, 24);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn unobserved_targets_do_not_count() {
        let mut features = set(&[("Bursa", 25)]);
        features.target_observed[0] = false;
        features.target_observed[1] = false;
        let err = train_entity(&features, "Bursa", &linear()).unwrap_err();
        assert!(matches!(err, ComputeError::InsufficientData { rows: 23, .. }));
    }

    #[test]
    fn batch_skips_short_entities_and_continues() {
        let features = set(&[("Adana", 30), ("Bursa", 10), ("Corum", 24)]);
        let (models, skipped) = Trainer::new(linear(), "total").train_all(&features);
        let trained: Vec<&str> = models.iter().map(|m| m.key.entity.as_str()).collect();
        assert_eq!(trained, vec!["Adana", "Corum"]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].entity, "Bursa");
        assert!(skipped[0].reason.contains("10 training rows"));
    }

    #[test]
    fn trained_model_records_contract() {
        let features = set(&[("Adana", 30)]);
        let model = train_entity(&features, "Adana", &linear()).unwrap();
        assert_eq!(model.key, ModelKey::new(DEFAULT_CATEGORY, "Adana"));
        assert_eq!(model.feature_columns, vec!["t".to_string(), "month".to_string()]);
        assert_eq!(model.train_rows, 30);
        assert!(model.train_metrics.unwrap().r2 > 0.999);
    }

    #[test]
    fn forest_training_is_deterministic() {
        let features = set(&[("Adana", 30)]);
        let a = train_entity(&features, "Adana", &PipelineConfig::default()).unwrap();
        let b = train_entity(&features, "Adana", &PipelineConfig::default()).unwrap();
        assert_eq!(a.model, b.model);
    }

    /// Linear fit with a little deterministic noise and one spiked month.
    fn spiked(n: usize, spike_at: usize) -> FeatureSet {
        let mut features = set(&[("Adana", n)]);
        for (i, t) in features.target.iter_mut().enumerate() {
            *t += [0.4, -0.3, 0.2, -0.1, 0.3, -0.4, 0.1][i % 7];
        }
        features.target[spike_at] += 500.0;
        features
    }

    #[test]
    fn refit_drops_anomalous_training_rows() {
        let features = spiked(36, 20);
        let model = train_entity(&features, "Adana", &linear()).unwrap();
        assert_eq!(model.excluded, vec![features.timestamps[20]]);
        assert_eq!(model.train_rows, 35);
        assert_eq!(model.fit_timestamps.len(), 35);
        assert!(!model.fit_timestamps.contains(&features.timestamps[20]));

        // the spike is no longer absorbed by the fit
        let predicted = model.predict(&features, &[20]).unwrap()[0];
        assert!((predicted - (100.0 + 40.0)).abs() < 5.0, "predicted {predicted}");
    }

    #[test]
    fn refit_is_skipped_when_it_would_leave_too_few_rows() {
        let features = spiked(24, 5);
        let model = train_entity(&features, "Adana", &linear()).unwrap();
        assert!(model.excluded.is_empty());
        assert_eq!(model.train_rows, 24);
    }

    #[test]
    fn refit_can_be_disabled() {
        let features = spiked(36, 20);
        let mut config = linear();
        config.model.robust_refit = false;
        let model = train_entity(&features, "Adana", &config).unwrap();
        assert!(model.excluded.is_empty());
        assert_eq!(model.fit_timestamps.len(), 36);
    }

    #[test]
    fn fitted_rows_are_predicted_out_of_bag() {
        let features = spiked(36, 20);
        let mut config = PipelineConfig::default();
        config.model.robust_refit = false;
        let model = train_entity(&features, "Adana", &config).unwrap();
        let FittedModel::Forest(forest) = &model.model else {
            panic!("expected forest");
        };
        let row: Vec<f64> = features.matrix.row(20).iter().copied().collect();
        let predicted = model.predict(&features, &[20]).unwrap()[0];
        assert_eq!(predicted, forest.predict_held_out(&row, 20));
    }
}
