//! Applying jobs to the target store.

use crate::config::WorkerConfig;
use crate::error::{ApplyError, ApplyResult, ConfigError};
use parking_lot::RwLock;
use rowmirror_core::{ChangeDecoder, DecodedRecord, Delivery, IdentityResolver, Registry};
use rowmirror_model::{
    FieldDef, Identity, ManyToManyDef, PrimaryKey, Record, Value, WatchedEntityType, PK_FIELD,
};
use rowmirror_protocol::{Job, Operation, Payload, Reference};
use rowmirror_store::{atomic, Filter, RecordStore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What a successfully applied job did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A row was inserted with this target pk.
    Inserted(PrimaryKey),
    /// The row with this target pk was updated.
    Updated(PrimaryKey),
    /// This many rows were deleted (zero is success).
    Deleted(usize),
    /// The association already existed.
    AlreadyAssociated,
}

impl fmt::Display for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applied::Inserted(pk) => write!(f, "inserted pk={pk}"),
            Applied::Updated(pk) => write!(f, "updated pk={pk}"),
            Applied::Deleted(n) => write!(f, "deleted {n} row(s)"),
            Applied::AlreadyAssociated => write!(f, "already associated"),
        }
    }
}

/// Result of processing one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The job was applied.
    Applied(Applied),
    /// The job failed transiently and should be redelivered after `delay`.
    Retry {
        /// Backoff before the next delivery.
        delay: Duration,
        /// The failure.
        error: String,
    },
    /// The job failed for good and was logged.
    PermanentFailure {
        /// The failure.
        error: String,
    },
}

impl JobOutcome {
    /// Returns true for [`JobOutcome::Applied`].
    pub fn is_applied(&self) -> bool {
        matches!(self, JobOutcome::Applied(_))
    }
}

/// Statistics about processed jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Jobs applied.
    pub applied: u64,
    /// Deliveries handed back for retry.
    pub retried: u64,
    /// Jobs dropped after a permanent failure.
    pub failed: u64,
    /// Payload entries dropped while decoding.
    pub skipped_fields: u64,
}

/// Applies jobs to the target store.
///
/// Stateless between jobs apart from its counters. Each job runs in one
/// target-store transaction, so a failed job leaves no partial writes.
///
/// ## Identity rules
///
/// - Creates of natural-keyed types (and of every type when
///   `nullify_primary_key_on_create` is set) let the target assign the pk
/// - Association creates always take a fresh pk and are a no-op if the
///   pair is already associated
/// - Updates and deletes locate rows by the shipped identity, never by
///   assuming source and target pks match
/// - A shipped primary key is matched through the legacy field when the
///   type declares it; otherwise it is used as a target pk only for
///   primary-keyed types whose pks were kept on create, and fails the
///   job permanently everywhere else
pub struct ReplicationWorker {
    registry: Arc<Registry>,
    target: Arc<dyn RecordStore>,
    config: WorkerConfig,
    stats: RwLock<WorkerStats>,
}

impl ReplicationWorker {
    /// Creates a worker applying jobs to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        registry: Arc<Registry>,
        target: Arc<dyn RecordStore>,
        config: WorkerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry,
            target,
            config,
            stats: RwLock::new(WorkerStats::default()),
        })
    }

    /// Gets the configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Gets the registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Gets the current stats.
    pub fn stats(&self) -> WorkerStats {
        self.stats.read().clone()
    }

    /// Processes one delivery and classifies the result.
    ///
    /// Retryable failures below the attempt ceiling become
    /// [`JobOutcome::Retry`]. Everything else that fails is logged once at
    /// error level, with the raw payload, and becomes
    /// [`JobOutcome::PermanentFailure`].
    pub fn process(&self, delivery: &Delivery) -> JobOutcome {
        let job = &delivery.job;
        match self.apply(job) {
            Ok(applied) => {
                tracing::info!(
                    job_id = %delivery.id,
                    operation = %job.operation,
                    entity = %job.entity,
                    attempt = delivery.attempt,
                    result = %applied,
                    "applied job"
                );
                self.stats.write().applied += 1;
                JobOutcome::Applied(applied)
            }
            Err(e) if e.is_retryable() && self.config.retry.allows_another(delivery.attempt) => {
                let delay = self.config.retry.delay_for_attempt(delivery.attempt);
                tracing::warn!(
                    job_id = %delivery.id,
                    operation = %job.operation,
                    entity = %job.entity,
                    attempt = delivery.attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "job failed, retrying"
                );
                self.stats.write().retried += 1;
                JobOutcome::Retry {
                    delay,
                    error: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(
                    job_id = %delivery.id,
                    operation = %job.operation,
                    entity = %job.entity,
                    identity = %job_identity(job),
                    payload = %job.payload,
                    attempt = delivery.attempt,
                    error = %e,
                    "permanent failure, job dropped"
                );
                self.stats.write().failed += 1;
                JobOutcome::PermanentFailure {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Applies one job inside a target-store transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is malformed, its references cannot be
    /// resolved, or the target store fails. See
    /// [`ApplyError::is_retryable`] for the classification.
    pub fn apply(&self, job: &Job) -> ApplyResult<Applied> {
        let payload = job.payload()?;
        let schema = Arc::clone(self.registry.require_schema(&job.entity)?);

        atomic(self.target.as_ref(), |store| match job.operation {
            Operation::Create => self.create(store, &schema, &payload),
            Operation::Update => {
                self.update(store, &schema, job.original_identity.as_ref(), &payload)
            }
            Operation::Delete => self.delete(store, &schema, &payload),
        })
    }

    fn resolver<'a>(&'a self, store: &'a dyn RecordStore) -> IdentityResolver<'a> {
        IdentityResolver::new(&self.registry, store)
            .with_legacy_pk_field(self.config.legacy_primary_key_field.as_deref())
            .with_reassigned_pks(self.config.nullify_primary_key_on_create)
    }

    fn legacy_field<'s>(&'s self, schema: &WatchedEntityType) -> Option<&'s str> {
        self.config
            .legacy_primary_key_field
            .as_deref()
            .filter(|field| schema.field_def(field).is_some())
    }

    fn note_skipped(&self, decoded: &DecodedRecord) {
        if !decoded.skipped.is_empty() {
            self.stats.write().skipped_fields += decoded.skipped.len() as u64;
        }
    }

    fn create(
        &self,
        store: &dyn RecordStore,
        schema: &WatchedEntityType,
        payload: &Payload,
    ) -> ApplyResult<Applied> {
        let resolver = self.resolver(store);
        let decoder = ChangeDecoder::new(resolver);
        let decoded = decoder.decode(schema, payload)?;
        self.note_skipped(&decoded);

        if schema.association {
            return create_association(store, schema, decoded.record);
        }

        let mut record = decoded.record;
        let source_pk = match decoded.shipped {
            Some(Reference::Primary(pk) | Reference::Fallback(pk)) => Some(pk),
            _ => None,
        };
        if let (Some(field), Some(pk)) = (self.legacy_field(schema), source_pk) {
            record.set(field, pk);
        }
        if !schema.uses_natural_key() && !self.config.nullify_primary_key_on_create {
            record.pk = source_pk;
        }

        self.check_collision(store, schema, &record)?;
        let pk = store.insert(record)?;

        for pending in &decoded.associations {
            let relation = schema.require_relation(&pending.relation)?;
            for other in decoder.resolve_association(relation, pending)? {
                associate(store, relation, pk, other)?;
            }
        }
        Ok(Applied::Inserted(pk))
    }

    fn check_collision(
        &self,
        store: &dyn RecordStore,
        schema: &WatchedEntityType,
        record: &Record,
    ) -> ApplyResult<()> {
        if let Some(values) = IdentityResolver::natural_key_of(schema, record) {
            let identity = Identity::NaturalKey(values);
            if let Some(filter) = self.resolver(store).filter_for(schema, &identity)? {
                if !store.find(&schema.key, &filter)?.is_empty() {
                    return Err(collision(schema, identity));
                }
            }
        }
        if let Some(field) = self.legacy_field(schema) {
            if let Some(value) = record.get(field).filter(|v| !v.is_null()) {
                let filter = Filter::new().eq(field, value.clone());
                if !store.find(&schema.key, &filter)?.is_empty() {
                    return Err(ApplyError::Collision {
                        entity: schema.key.to_string(),
                        identity: format!("{field}={value}"),
                    });
                }
            }
        }
        if let Some(pk) = record.pk {
            if store.get(&schema.key, pk)?.is_some() {
                return Err(collision(schema, Identity::PrimaryKey(pk)));
            }
        }
        Ok(())
    }

    fn update(
        &self,
        store: &dyn RecordStore,
        schema: &WatchedEntityType,
        original: Option<&Identity>,
        payload: &Payload,
    ) -> ApplyResult<Applied> {
        let original = match original {
            Some(identity) => identity.clone(),
            None => payload
                .own_reference()
                .map(|reference| reference.identity())
                .ok_or_else(|| {
                    ApplyError::InvalidJob(format!("update of {} carries no identity", schema.key))
                })?,
        };

        let resolver = self.resolver(store);
        let mut existing = resolver.resolve(&schema.key, &original)?;
        let pk = existing.pk.ok_or_else(|| {
            ApplyError::InvalidJob(format!("resolved {} row has no primary key", schema.key))
        })?;

        let decoded = ChangeDecoder::new(resolver).decode(schema, payload)?;
        self.note_skipped(&decoded);

        let legacy = self.legacy_field(schema);
        for (field, value) in decoded.record.fields {
            if legacy == Some(field.as_str()) {
                continue;
            }
            existing.set(field, value);
        }
        store.update(&existing)?;
        Ok(Applied::Updated(pk))
    }

    fn delete(
        &self,
        store: &dyn RecordStore,
        schema: &WatchedEntityType,
        payload: &Payload,
    ) -> ApplyResult<Applied> {
        let resolver = self.resolver(store);
        let mut filter = Filter::new();

        for (key, json) in payload.iter() {
            if key == PK_FIELD {
                let reference = reference_in(schema, key, json)?;
                let pk = resolver.resolve_reference(&schema.key, &reference)?;
                filter = filter.eq(PK_FIELD, pk);
                continue;
            }
            let Some(field) = delete_field(schema, key) else {
                tracing::warn!(entity = %schema.key, field = key, "unknown field in delete payload, ignoring");
                continue;
            };
            match field.foreign_target() {
                Some(target) => {
                    let reference = reference_in(schema, key, json)?;
                    let pk = resolver.resolve_reference(target, &reference)?;
                    filter = filter.eq(field.name.clone(), pk);
                }
                None => {
                    let value = Value::from_json(json).ok_or_else(|| {
                        ApplyError::InvalidJob(format!(
                            "delete of {} has a non-scalar {key}",
                            schema.key
                        ))
                    })?;
                    filter = filter.eq(field.name.clone(), value);
                }
            }
        }

        if filter.is_empty() {
            return Err(ApplyError::InvalidJob(format!(
                "delete of {} carries no identity fields",
                schema.key
            )));
        }
        let deleted = store.delete_where(&schema.key, &filter)?;
        if deleted == 0 {
            tracing::debug!(entity = %schema.key, filter = %filter, "delete matched no rows");
        }
        Ok(Applied::Deleted(deleted))
    }
}

impl fmt::Debug for ReplicationWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationWorker")
            .field("config", &self.config)
            .field("stats", &*self.stats.read())
            .finish_non_exhaustive()
    }
}

fn create_association(
    store: &dyn RecordStore,
    schema: &WatchedEntityType,
    record: Record,
) -> ApplyResult<Applied> {
    let mut filter = Filter::new();
    for (field, _) in schema.foreign_keys() {
        let Some(value) = record.get(&field.name).filter(|v| !v.is_null()) else {
            return Err(ApplyError::InvalidJob(format!(
                "association {} is missing {}",
                schema.key, field.name
            )));
        };
        filter = filter.eq(field.name.clone(), value.clone());
    }
    if !store.find(&schema.key, &filter)?.is_empty() {
        tracing::debug!(entity = %schema.key, pair = %filter, "association already present");
        return Ok(Applied::AlreadyAssociated);
    }
    Ok(Applied::Inserted(store.insert(record)?))
}

fn associate(
    store: &dyn RecordStore,
    relation: &ManyToManyDef,
    owner: PrimaryKey,
    other: PrimaryKey,
) -> ApplyResult<()> {
    let filter = Filter::new()
        .eq(relation.source_column.clone(), owner)
        .eq(relation.target_column.clone(), other);
    if store.find(&relation.through, &filter)?.is_empty() {
        store.insert(
            Record::new(relation.through.clone())
                .with(relation.source_column.clone(), owner)
                .with(relation.target_column.clone(), other),
        )?;
    }
    Ok(())
}

fn delete_field<'s>(schema: &'s WatchedEntityType, key: &str) -> Option<&'s FieldDef> {
    schema.field_def(key).or_else(|| {
        key.strip_suffix("_id")
            .and_then(|base| schema.field_def(base))
            .filter(|field| field.foreign_target().is_some())
    })
}

fn reference_in(
    schema: &WatchedEntityType,
    key: &str,
    json: &serde_json::Value,
) -> ApplyResult<Reference> {
    Reference::from_json(json).ok_or_else(|| {
        ApplyError::InvalidJob(format!("{key} of {} is not a reference: {json}", schema.key))
    })
}

fn collision(schema: &WatchedEntityType, identity: Identity) -> ApplyError {
    ApplyError::Collision {
        entity: schema.key.to_string(),
        identity: identity.to_string(),
    }
}

/// Best-effort identity for failure logs.
fn job_identity(job: &Job) -> String {
    if let Some(identity) = &job.original_identity {
        return identity.to_string();
    }
    job.payload()
        .ok()
        .and_then(|payload| payload.own_reference())
        .map_or_else(|| "-".to_string(), |reference| reference.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use rowmirror_model::{EntityKey, FieldKind};
    use rowmirror_protocol::{ChangeEvent, JobId};
    use rowmirror_store::{Fault, MemoryStore};
    use serde_json::json;

    fn related() -> WatchedEntityType {
        WatchedEntityType::new("local", "relatedmodel")
            .field("char_field", FieldKind::Text)
            .natural_key(["char_field"])
    }

    fn plain() -> WatchedEntityType {
        WatchedEntityType::new("local", "plainmodel")
            .field("title", FieldKind::Text)
            .nullable_field("legacy_pk", FieldKind::Integer)
    }

    fn setup(config: WorkerConfig) -> (ReplicationWorker, Arc<MemoryStore>) {
        let mut registry = Registry::new();
        registry.register_entity(related()).unwrap();
        registry.register_entity(plain()).unwrap();
        let target = Arc::new(MemoryStore::new());
        let worker = ReplicationWorker::new(
            Arc::new(registry),
            Arc::clone(&target) as Arc<dyn RecordStore>,
            config,
        )
        .unwrap();
        (worker, target)
    }

    fn payload(value: serde_json::Value) -> Payload {
        Payload::from_json_str(&value.to_string()).unwrap()
    }

    fn delivery(job: Job, attempt: u32) -> Delivery {
        Delivery {
            id: JobId::new(),
            job,
            attempt,
        }
    }

    #[test]
    fn natural_keyed_create_takes_target_pk() {
        let (worker, target) = setup(WorkerConfig::default());
        target
            .insert(Record::new(related().key).with("char_field", "bar"))
            .unwrap();

        let job = ChangeEvent::create(related().key, payload(json!({"pk": ["foo"], "char_field": "foo"})))
            .to_job();
        assert_eq!(worker.apply(&job).unwrap(), Applied::Inserted(PrimaryKey(2)));
        assert_eq!(target.len(&related().key), 2);
    }

    #[test]
    fn primary_keyed_create_keeps_pk_unless_nullified() {
        let job = ChangeEvent::create(plain().key, payload(json!({"pk": 7, "title": "t"}))).to_job();

        let (worker, _) = setup(WorkerConfig::default());
        assert_eq!(worker.apply(&job).unwrap(), Applied::Inserted(PrimaryKey(7)));

        let (worker, target) = setup(
            WorkerConfig::new()
                .with_nullify_primary_key_on_create(true)
                .with_legacy_primary_key_field("legacy_pk"),
        );
        assert_eq!(worker.apply(&job).unwrap(), Applied::Inserted(PrimaryKey(1)));
        let stored = target.get(&plain().key, PrimaryKey(1)).unwrap().unwrap();
        assert_eq!(stored.get("legacy_pk"), Some(&Value::Integer(7)));
    }

    #[test]
    fn legacy_field_resolves_updates() {
        let (worker, target) = setup(
            WorkerConfig::new()
                .with_nullify_primary_key_on_create(true)
                .with_legacy_primary_key_field("legacy_pk"),
        );
        worker
            .apply(&ChangeEvent::create(plain().key, payload(json!({"pk": 7, "title": "t"}))).to_job())
            .unwrap();

        let update = ChangeEvent::update(
            plain().key,
            Identity::PrimaryKey(PrimaryKey(7)),
            payload(json!({"pk": 7, "title": "renamed", "legacy_pk": null})),
        );
        assert_eq!(worker.apply(&update.to_job()).unwrap(), Applied::Updated(PrimaryKey(1)));

        let stored = target.get(&plain().key, PrimaryKey(1)).unwrap().unwrap();
        assert_eq!(stored.get("title"), Some(&Value::from("renamed")));
        assert_eq!(stored.get("legacy_pk"), Some(&Value::Integer(7)));
    }

    #[test]
    fn natural_keyed_row_is_not_located_by_source_pk() {
        let (worker, target) = setup(WorkerConfig::new().with_retry(RetryConfig::immediate(5)));
        target
            .insert(Record::new(related().key).with("char_field", "bystander"))
            .unwrap();

        let update = ChangeEvent::update(
            related().key,
            Identity::PrimaryKey(PrimaryKey(1)),
            payload(json!({"pk": {"pk": 1}, "char_field": "filled"})),
        );
        let delete = ChangeEvent::delete(related().key, payload(json!({"pk": {"pk": 1}})));
        for job in [update.to_job(), delete.to_job()] {
            assert!(matches!(
                worker.process(&delivery(job, 1)),
                JobOutcome::PermanentFailure { .. }
            ));
        }

        let bystander = target.get(&related().key, PrimaryKey(1)).unwrap().unwrap();
        assert_eq!(bystander.get("char_field"), Some(&Value::from("bystander")));
        assert_eq!(worker.stats().failed, 2);
    }

    #[test]
    fn duplicate_create_is_retryable() {
        let (worker, target) = setup(WorkerConfig::default());
        let job = ChangeEvent::create(related().key, payload(json!({"pk": ["foo"], "char_field": "foo"})))
            .to_job();
        worker.apply(&job).unwrap();

        let err = worker.apply(&job).unwrap_err();
        assert!(matches!(err, ApplyError::Collision { .. }));
        assert!(err.is_retryable());
        assert_eq!(target.len(&related().key), 1);
    }

    #[test]
    fn delete_by_natural_key() {
        let (worker, target) = setup(WorkerConfig::default());
        target
            .insert(Record::new(related().key).with_pk(40).with("char_field", "foo"))
            .unwrap();

        let job = ChangeEvent::delete(related().key, payload(json!({"pk": ["foo"]}))).to_job();
        assert_eq!(worker.apply(&job).unwrap(), Applied::Deleted(1));
        assert_eq!(target.len(&related().key), 0);
    }

    #[test]
    fn delete_without_identity_is_permanent() {
        let (worker, _) = setup(WorkerConfig::default());
        let job = ChangeEvent::delete(related().key, payload(json!({"unknown": 1}))).to_job();
        let outcome = worker.process(&delivery(job, 1));
        assert!(matches!(outcome, JobOutcome::PermanentFailure { .. }));
        assert_eq!(worker.stats().failed, 1);
    }

    #[test]
    fn unknown_entity_fails_permanently_on_first_attempt() {
        let (worker, _) = setup(WorkerConfig::default());
        let job = ChangeEvent::create(EntityKey::new("local", "nope"), Payload::new()).to_job();
        assert!(matches!(
            worker.process(&delivery(job, 1)),
            JobOutcome::PermanentFailure { .. }
        ));
    }

    #[test]
    fn update_before_create_retries_until_ceiling() {
        let (worker, _) = setup(WorkerConfig::new().with_retry(RetryConfig::immediate(5)));
        let job = ChangeEvent::update(
            related().key,
            Identity::natural(["missing"]),
            payload(json!({"pk": ["missing"], "char_field": "missing"})),
        )
        .to_job();

        for attempt in 1..5 {
            assert!(matches!(
                worker.process(&delivery(job.clone(), attempt)),
                JobOutcome::Retry { .. }
            ));
        }
        assert!(matches!(
            worker.process(&delivery(job, 5)),
            JobOutcome::PermanentFailure { .. }
        ));
        let stats = worker.stats();
        assert_eq!(stats.retried, 4);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn transient_store_failure_is_retried() {
        let (worker, target) = setup(WorkerConfig::new().with_retry(RetryConfig::immediate(3)));
        target.inject(Fault::LockConflict, 1);
        let job = ChangeEvent::create(plain().key, payload(json!({"pk": 1, "title": "t"}))).to_job();

        assert!(matches!(
            worker.process(&delivery(job.clone(), 1)),
            JobOutcome::Retry { .. }
        ));
        assert!(worker.process(&delivery(job, 2)).is_applied());
    }

    #[test]
    fn skipped_fields_are_counted() {
        let (worker, _) = setup(WorkerConfig::default());
        let job = ChangeEvent::create(
            plain().key,
            payload(json!({"pk": 3, "title": "t", "dropped_column": true})),
        )
        .to_job();
        worker.apply(&job).unwrap();
        assert_eq!(worker.stats().skipped_fields, 1);
    }
}
