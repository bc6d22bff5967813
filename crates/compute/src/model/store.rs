use std::sync::Mutex;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ModelKey, ModelRegistry, TrainedModel};
use crate::error::{ComputeError, ComputeResult};

/// Where a saved model lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub key: ModelKey,
    /// Store-specific location (file path, memory slot).
    pub location: String,
}

/// Model persistence collaborator.
pub trait ModelStore: Send + Sync {
    fn save(&self, model: &TrainedModel) -> ComputeResult<ModelHandle>;

    fn load(&self, handle: &ModelHandle) -> ComputeResult<TrainedModel>;

    /// Saved models, sorted by key.
    fn list(&self) -> ComputeResult<Vec<ModelHandle>>;

    /// Returns `false` when nothing was stored under the handle.
    fn remove(&self, handle: &ModelHandle) -> ComputeResult<bool>;

    fn save_all(&self, models: &[TrainedModel]) -> ComputeResult<Vec<ModelHandle>> {
        models.iter().map(|m| self.save(m)).collect()
    }

    /// Load every saved model into a fresh registry.
    fn load_registry(&self) -> ComputeResult<ModelRegistry> {
        let handles = self.list()?;
        let models = handles
            .iter()
            .map(|h| self.load(h))
            .collect::<ComputeResult<Vec<_>>>()?;
        debug!(models = models.len(), "registry loaded from store");
        Ok(ModelRegistry::from_models(models))
    }
}

/// In-process store, used by tests and single-shot `detect` runs.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    models: Mutex<IndexMap<ModelKey, TrainedModel>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, IndexMap<ModelKey, TrainedModel>> {
        match self.models.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ModelStore for MemoryModelStore {
    fn save(&self, model: &TrainedModel) -> ComputeResult<ModelHandle> {
        self.guard().insert(model.key.clone(), model.clone());
        Ok(ModelHandle {
            key: model.key.clone(),
            location: format!("memory://{}", model.key),
        })
    }

    fn load(&self, handle: &ModelHandle) -> ComputeResult<TrainedModel> {
        self.guard()
            .get(&handle.key)
            .cloned()
            .ok_or_else(|| ComputeError::Store(format!("no model stored for {}", handle.key)))
    }

    fn list(&self) -> ComputeResult<Vec<ModelHandle>> {
        let mut keys: Vec<ModelKey> = self.guard().keys().cloned().collect();
        keys.sort();
        Ok(keys
            .into_iter()
            .map(|key| ModelHandle {
                location: format!("memory://{key}"),
                key,
            })
            .collect())
    }

    fn remove(&self, handle: &ModelHandle) -> ComputeResult<bool> {
        Ok(self.guard().shift_remove(&handle.key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::{FittedModel, LinearModel};

    fn model(entity: &str) -> TrainedModel {
        TrainedModel {
            key: ModelKey::new("total", entity),
            target_column: "Genel_Toplam_MWh".into(),
            feature_columns: vec!["month".into()],
            model: FittedModel::Linear(LinearModel {
                intercept: 5.0,
                coefficients: vec![1.0],
                means: vec![6.5],
                scales: vec![3.4],
                iterations: 0,
            }),
            train_rows: 36,
            trained_at: Utc::now(),
            train_metrics: None,
            test_metrics: None,
            fit_timestamps: Vec::new(),
            excluded: Vec::new(),
        }
    }

    #[test]
    fn save_load_list_remove() {
        let store = MemoryModelStore::new();
        let handles = store.save_all(&[model("Izmir"), model("Adana")]).unwrap();
        assert_eq!(handles.len(), 2);

        let listed = store.list().unwrap();
        assert_eq!(listed[0].key.entity, "Adana");
        let loaded = store.load(&handles[0]).unwrap();
        assert_eq!(loaded.key, handles[0].key);
        assert_eq!(loaded.model.predict_row(&[6.5]), 5.0);

        assert!(store.remove(&handles[0]).unwrap());
        assert!(!store.remove(&handles[0]).unwrap());
        assert!(matches!(store.load(&handles[0]), Err(ComputeError::Store(_))));
    }

    #[test]
    fn load_registry_collects_everything() {
        let store = MemoryModelStore::new();
        store.save(&model("B")).unwrap();
        store.save(&model("A")).unwrap();
        let registry = store.load_registry().unwrap();
        assert_eq!(registry.entities("total"), vec!["A".to_string(), "B".to_string()]);
    }
}
