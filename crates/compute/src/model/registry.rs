use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use super::{ModelKey, TrainedModel};

/// Trained models keyed by (category, entity).
///
/// Read-only once built. A retrain builds a new registry and swaps it in
/// through [`SharedRegistry::replace`].
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: IndexMap<ModelKey, Arc<TrainedModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_models(models: impl IntoIterator<Item = TrainedModel>) -> Self {
        let mut registry = Self::new();
        for model in models {
            registry.insert(model);
        }
        registry.models.sort_keys();
        registry
    }

    /// Insert or replace the model for its key.
    pub fn insert(&mut self, model: TrainedModel) {
        self.models.insert(model.key.clone(), Arc::new(model));
    }

    pub fn get(&self, key: &ModelKey) -> Option<Arc<TrainedModel>> {
        self.models.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ModelKey> {
        self.models.keys()
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<TrainedModel>> {
        self.models.values()
    }

    /// Entities with a model in `category`, sorted.
    pub fn entities(&self, category: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .models
            .keys()
            .filter(|k| k.category == category)
            .map(|k| k.entity.clone())
            .collect();
        out.sort();
        out
    }
}

/// Thread-safe handle to the current registry snapshot.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RwLock<Arc<ModelRegistry>>>,
}

impl SharedRegistry {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// The registry as of now; later replacements do not affect it.
    pub fn snapshot(&self) -> Arc<ModelRegistry> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new registry wholesale.
    pub fn replace(&self, registry: ModelRegistry) {
        let next = Arc::new(registry);
        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
