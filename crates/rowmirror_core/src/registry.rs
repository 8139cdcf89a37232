//! Registry of watched entity types.

use crate::capture::{CaptureLayer, EntityCapture};
use crate::error::{ResolveError, ResolveResult};
use crate::policy::SyncPolicy;
use rowmirror_model::{EntityKey, ModelResult, WatchedEntityType};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps entity types to their capture layers and schemas.
///
/// Built once at process start, then shared read-only as `Arc<Registry>`
/// by the capture service and the replication worker. Association types
/// derived from many-to-many relations get a schema entry but no capture
/// layer of their own.
#[derive(Default)]
pub struct Registry {
    layers: HashMap<EntityKey, Arc<dyn CaptureLayer>>,
    schemas: HashMap<EntityKey, Arc<WatchedEntityType>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a capture layer.
    ///
    /// Returns `false` (and changes nothing) if the type is already
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer's schema fails validation.
    pub fn register(&mut self, layer: Arc<dyn CaptureLayer>) -> ModelResult<bool> {
        let schema = Arc::clone(layer.schema());
        schema.validate()?;

        if self.layers.contains_key(&schema.key) {
            tracing::info!(entity = %schema.key, "entity type already registered");
            return Ok(false);
        }

        for through in schema.through_types() {
            through.validate()?;
            self.schemas
                .entry(through.key.clone())
                .or_insert_with(|| Arc::new(through));
        }
        tracing::debug!(
            entity = %schema.key,
            natural_key = schema.uses_natural_key(),
            relations = schema.many_to_many.len(),
            "registered entity type"
        );
        self.schemas.insert(schema.key.clone(), Arc::clone(&schema));
        self.layers.insert(schema.key.clone(), layer);
        Ok(true)
    }

    /// Registers a type with the default policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema fails validation.
    pub fn register_entity(&mut self, schema: WatchedEntityType) -> ModelResult<bool> {
        self.register(Arc::new(EntityCapture::new(schema)))
    }

    /// Registers a type with a custom policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema fails validation.
    pub fn register_with_policy(
        &mut self,
        schema: WatchedEntityType,
        policy: Arc<dyn SyncPolicy>,
    ) -> ModelResult<bool> {
        self.register(Arc::new(EntityCapture::with_policy(schema, policy)))
    }

    /// Returns true if the type has a capture layer.
    #[must_use]
    pub fn is_registered(&self, entity: &EntityKey) -> bool {
        self.layers.contains_key(entity)
    }

    /// Returns the capture layer of a type.
    #[must_use]
    pub fn layer(&self, entity: &EntityKey) -> Option<&Arc<dyn CaptureLayer>> {
        self.layers.get(entity)
    }

    /// Returns the schema of a registered or association type.
    #[must_use]
    pub fn schema(&self, entity: &EntityKey) -> Option<&Arc<WatchedEntityType>> {
        self.schemas.get(entity)
    }

    /// Returns the schema of a type, failing if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownEntity`] if there is no schema.
    pub fn require_schema(&self, entity: &EntityKey) -> ResolveResult<&Arc<WatchedEntityType>> {
        self.schema(entity)
            .ok_or_else(|| ResolveError::UnknownEntity(entity.to_string()))
    }

    /// Returns every known schema, ordered by entity key.
    #[must_use]
    pub fn schemas(&self) -> Vec<&Arc<WatchedEntityType>> {
        let mut all: Vec<_> = self.schemas.values().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Number of registered (non-association) types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.layers.keys().map(ToString::to_string).collect();
        keys.sort();
        f.debug_struct("Registry")
            .field("registered", &keys)
            .field("schemas", &self.schemas.len())
            .finish()
    }
}
