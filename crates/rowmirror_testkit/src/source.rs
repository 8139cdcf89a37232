//! An emulated source data-access layer.

use rowmirror_core::{
    AssociationChange, CaptureService, HookOutcome, JobQueue, MemoryQueue, Registry, WriteContext,
};
use rowmirror_model::{ManyToManyDef, PrimaryKey, Record};
use rowmirror_protocol::Job;
use rowmirror_store::{Filter, MemoryStore, RecordStore, StoreError, StoreResult};
use std::sync::Arc;

/// Writes records to a [`MemoryStore`] and fires the capture hooks the
/// way an ORM's signals would.
///
/// Relationship changes are always reported from the owner's side, so a
/// reverse-side add is expressed as `add(owner, relation, [other])`.
pub struct SourceDb {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    capture: CaptureService,
}

impl SourceDb {
    /// Creates a source database with its own store and queue.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_store(registry, crate::fixtures::store())
    }

    /// Creates a source database over an existing store.
    pub fn with_store(registry: Arc<Registry>, store: Arc<MemoryStore>) -> Self {
        let queue = Arc::new(MemoryQueue::new());
        let capture = CaptureService::new(
            registry,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&queue) as Arc<dyn JobQueue>,
        );
        Self {
            store,
            queue,
            capture,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// The queue receiving captured jobs.
    pub fn queue(&self) -> &Arc<MemoryQueue> {
        &self.queue
    }

    /// The capture service.
    pub fn capture(&self) -> &CaptureService {
        &self.capture
    }

    /// Removes and returns every queued job in order.
    pub fn drain_jobs(&self) -> Vec<Job> {
        self.queue.drain_jobs()
    }

    /// Inserts a record and returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the insert.
    pub fn create(&self, record: Record) -> StoreResult<Record> {
        self.create_with(&WriteContext::new(), record)
    }

    /// Inserts a record through a raw (bulk-loader) write.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the insert.
    pub fn create_raw(&self, record: Record) -> StoreResult<Record> {
        self.create_with(&WriteContext::raw(), record)
    }

    /// Inserts a record under the given context.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the insert.
    pub fn create_with(&self, ctx: &WriteContext, record: Record) -> StoreResult<Record> {
        self.capture.before_write(ctx, &record);
        let entity = record.entity.clone();
        let pk = self.store.insert(record).map_err(|e| self.abandon(ctx, e))?;
        let stored = self.fetch(&entity, pk)?;
        self.capture.record_saved(ctx, &stored, true);
        Ok(stored)
    }

    /// Saves changes to an existing record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the update.
    pub fn update(&self, record: &Record) -> StoreResult<Option<HookOutcome>> {
        let ctx = WriteContext::new();
        self.capture.before_write(&ctx, record);
        self.store.update(record).map_err(|e| self.abandon(&ctx, e))?;
        Ok(self.capture.record_saved(&ctx, record, false))
    }

    /// Deletes a record by primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no pk or the store fails.
    pub fn delete(&self, record: &Record) -> StoreResult<Option<HookOutcome>> {
        let pk = record
            .pk
            .ok_or_else(|| StoreError::InvalidRecord(format!("cannot delete unsaved {record}")))?;
        let stored = self.fetch(&record.entity, pk)?;
        self.store.delete_where(&record.entity, &Filter::pk(pk))?;
        Ok(self.capture.record_deleted(&WriteContext::new(), &stored))
    }

    /// Associates `others` with `owner`. Pairs that already exist are not
    /// reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation is unknown or the store fails.
    pub fn add(&self, owner: &Record, relation: &str, others: &[PrimaryKey]) -> StoreResult<()> {
        let (relation, owner_pk) = self.relation_of(owner, relation)?;
        let mut added = Vec::new();
        for &other in others {
            if !self.store.find(&relation.through, &pair(&relation, owner_pk, other))?.is_empty() {
                continue;
            }
            self.store.insert(
                Record::new(relation.through.clone())
                    .with(relation.source_column.clone(), owner_pk)
                    .with(relation.target_column.clone(), other),
            )?;
            added.push(other);
        }
        if !added.is_empty() {
            let change = AssociationChange::added(relation.name.clone(), owner.clone(), added);
            self.capture.association_changed(&WriteContext::new(), &change);
        }
        Ok(())
    }

    /// Dissociates `others` from `owner`. Pairs that do not exist are not
    /// reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation is unknown or the store fails.
    pub fn remove(&self, owner: &Record, relation: &str, others: &[PrimaryKey]) -> StoreResult<()> {
        let (relation, owner_pk) = self.relation_of(owner, relation)?;
        let mut removed = Vec::new();
        for &other in others {
            if self.store.delete_where(&relation.through, &pair(&relation, owner_pk, other))? > 0 {
                removed.push(other);
            }
        }
        if !removed.is_empty() {
            let change = AssociationChange::removed(relation.name.clone(), owner.clone(), removed);
            self.capture.association_changed(&WriteContext::new(), &change);
        }
        Ok(())
    }

    /// Dissociates every counterpart from `owner` in one bulk delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation is unknown or the store fails.
    pub fn clear(&self, owner: &Record, relation: &str) -> StoreResult<()> {
        let (relation, owner_pk) = self.relation_of(owner, relation)?;
        let ctx = WriteContext::new();
        self.capture.before_association_clear(&ctx, owner, &relation.name);
        self.store
            .delete_where(
                &relation.through,
                &Filter::new().eq(relation.source_column.clone(), owner_pk),
            )
            .map_err(|e| self.abandon(&ctx, e))?;
        let change = AssociationChange::cleared(relation.name.clone(), owner.clone());
        self.capture.association_changed(&ctx, &change);
        Ok(())
    }

    /// Releases the pre-hook state of a failed write and hands back its
    /// error.
    fn abandon(&self, ctx: &WriteContext, error: StoreError) -> StoreError {
        self.capture.abandon(ctx);
        error
    }

    fn fetch(&self, entity: &rowmirror_model::EntityKey, pk: PrimaryKey) -> StoreResult<Record> {
        self.store.get(entity, pk)?.ok_or_else(|| StoreError::NotFound {
            entity: entity.to_string(),
            pk: pk.get(),
        })
    }

    fn relation_of(&self, owner: &Record, name: &str) -> StoreResult<(ManyToManyDef, PrimaryKey)> {
        let schema = self
            .capture
            .registry()
            .schema(&owner.entity)
            .ok_or_else(|| StoreError::InvalidRecord(format!("{} is not registered", owner.entity)))?;
        let relation = schema
            .relation(name)
            .cloned()
            .ok_or_else(|| StoreError::InvalidRecord(format!("{} has no relation {name}", owner.entity)))?;
        let pk = owner
            .pk
            .ok_or_else(|| StoreError::InvalidRecord(format!("{owner} is not saved")))?;
        Ok((relation, pk))
    }
}

fn pair(relation: &ManyToManyDef, owner: PrimaryKey, other: PrimaryKey) -> Filter {
    Filter::new()
        .eq(relation.source_column.clone(), owner)
        .eq(relation.target_column.clone(), other)
}
