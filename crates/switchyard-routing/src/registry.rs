//! Registries: the descriptor catalogue and the adapter map.
//!
//! Descriptors are immutable once registered; an update is a re-registration
//! with a bumped revision that produces a new registry value, never an
//! in-place mutation. In-flight requests keep the snapshot they started with.

use crate::{Result, RoutingError};
use std::collections::HashMap;
use std::sync::Arc;
use switchyard_core::{BackendAdapter, ModelDescriptor, ModelId, RegistryDocument, TaskType};

/// Immutable catalogue of backend descriptors.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    /// Descriptors keyed by model id.
    models: HashMap<ModelId, Arc<ModelDescriptor>>,
    /// Version of the source document.
    version: u64,
}

impl ModelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a configuration document.
    ///
    /// # Errors
    /// Returns an error if the document contains duplicate model ids.
    pub fn from_document(document: RegistryDocument) -> Result<Self> {
        let mut models = HashMap::new();
        for descriptor in document.models {
            let id = descriptor.id.clone();
            if models.insert(id.clone(), Arc::new(descriptor)).is_some() {
                return Err(RoutingError::Config(format!(
                    "duplicate model id in registry: {id}"
                )));
            }
        }
        Ok(Self {
            models,
            version: document.version,
        })
    }

    /// Returns a new registry with the descriptor installed.
    ///
    /// Re-registering an existing id retires the old descriptor; the new one
    /// must carry a strictly higher revision.
    ///
    /// # Errors
    /// Returns an error if the revision does not advance.
    pub fn register(mut self, descriptor: ModelDescriptor) -> Result<Self> {
        if let Some(existing) = self.models.get(&descriptor.id)
            && descriptor.revision <= existing.revision
        {
            return Err(RoutingError::Config(format!(
                "re-registration of {} must bump revision past {}",
                descriptor.id, existing.revision
            )));
        }
        self.models
            .insert(descriptor.id.clone(), Arc::new(descriptor));
        Ok(self)
    }

    /// Convenience builder used by tests; panics are avoided by fresh ids.
    #[must_use]
    pub fn with_model(mut self, descriptor: ModelDescriptor) -> Self {
        self.models
            .insert(descriptor.id.clone(), Arc::new(descriptor));
        self
    }

    /// Looks up a descriptor.
    #[must_use]
    pub fn get(&self, id: &ModelId) -> Option<&Arc<ModelDescriptor>> {
        self.models.get(id)
    }

    /// All registered ids, sorted for deterministic iteration.
    #[must_use]
    pub fn ids(&self) -> Vec<ModelId> {
        let mut ids: Vec<_> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All descriptors capable of the given task, sorted by id.
    #[must_use]
    pub fn capable_of(&self, task_type: TaskType) -> Vec<&Arc<ModelDescriptor>> {
        let mut capable: Vec<_> = self
            .models
            .values()
            .filter(|descriptor| descriptor.supports(task_type))
            .collect();
        capable.sort_by(|left, right| left.id.cmp(&right.id));
        capable
    }

    /// Number of registered backends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Version of the source document.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Map from model id to the adapter instance that serves it.
///
/// Adapters are instantiated once and reused; adding a backend is a
/// registration here plus a descriptor in the catalogue, never a code branch
/// in the policy engine.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    /// Adapter instances keyed by model id.
    adapters: HashMap<ModelId, Arc<dyn BackendAdapter>>,
}

impl AdapterRegistry {
    /// Creates an empty adapter registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter for a model, replacing any previous one.
    pub fn register(&mut self, model: ModelId, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.insert(model, adapter);
    }

    /// Builder form of [`Self::register`].
    #[must_use]
    pub fn with_adapter(mut self, model: ModelId, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.register(model, adapter);
        self
    }

    /// Gets the adapter for a model.
    ///
    /// # Errors
    /// Returns an error if no adapter is registered for the model.
    pub fn get(&self, model: &ModelId) -> Result<Arc<dyn BackendAdapter>> {
        self.adapters.get(model).map(Arc::clone).ok_or_else(|| {
            RoutingError::Config(format!("no adapter registered for model: {model}"))
        })
    }

    /// All registered model ids.
    #[must_use]
    pub fn registered_models(&self) -> Vec<ModelId> {
        self.adapters.keys().cloned().collect()
    }
}
