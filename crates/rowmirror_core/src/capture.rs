//! Per-entity capture hooks.

use crate::encoder::ChangeEncoder;
use crate::error::CaptureResult;
use crate::identity::IdentityResolver;
use crate::policy::{AllowAll, SyncPolicy};
use crate::queue::JobQueue;
use crate::registry::Registry;
use crate::snapshot::{MutationId, Snapshot, SnapshotTable};
use crate::tracker::{AssociationChange, RelationshipTracker};
use rowmirror_model::{Record, WatchedEntityType, PK_FIELD};
use rowmirror_protocol::{ChangeEvent, JobId, Payload};
use rowmirror_store::RecordStore;
use std::fmt;
use std::sync::Arc;

/// Per-mutation context handed to every hook of one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteContext {
    /// Correlates the pre hook with the post hook.
    pub mutation: MutationId,
    /// Set for raw / bulk-loader writes, which are never replicated.
    pub raw: bool,
}

impl WriteContext {
    /// Context for an ordinary write.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mutation: MutationId::new(),
            raw: false,
        }
    }

    /// Context for a raw write.
    #[must_use]
    pub fn raw() -> Self {
        Self {
            mutation: MutationId::new(),
            raw: true,
        }
    }
}

impl Default for WriteContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What the hooks need from their surroundings.
#[derive(Clone, Copy)]
pub struct CaptureEnv<'a> {
    /// Registry of watched types.
    pub registry: &'a Registry,
    /// Read access to the source store.
    pub source: &'a dyn RecordStore,
    /// Where jobs go.
    pub queue: &'a dyn JobQueue,
    /// Side-table of pre-mutation snapshots.
    pub snapshots: &'a SnapshotTable,
}

impl<'a> CaptureEnv<'a> {
    /// A resolver reading the source store.
    #[must_use]
    pub fn resolver(&self) -> IdentityResolver<'a> {
        IdentityResolver::new(self.registry, self.source)
    }

    /// An encoder reading the source store.
    #[must_use]
    pub fn encoder(&self) -> ChangeEncoder<'a> {
        ChangeEncoder::new(self.resolver())
    }

    /// Converts the event into a job and enqueues it.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue rejects the job.
    pub fn enqueue(&self, event: &ChangeEvent) -> CaptureResult<JobId> {
        let job = event.to_job();
        let id = self.queue.enqueue(job)?;
        tracing::info!(
            job_id = %id,
            operation = %event.operation,
            entity = %event.entity,
            "enqueued change"
        );
        Ok(id)
    }
}

/// Why a hook produced no job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The write came from a raw / bulk loader.
    RawWrite,
    /// The policy denied the change.
    Denied,
    /// The entity type is not registered.
    Unregistered,
    /// There was nothing to replicate.
    NothingToCapture,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::RawWrite => "raw write",
            SkipReason::Denied => "denied by policy",
            SkipReason::Unregistered => "unregistered entity type",
            SkipReason::NothingToCapture => "nothing to capture",
        })
    }
}

/// Result of a successful hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Jobs were enqueued.
    Enqueued(Vec<JobId>),
    /// A snapshot was stored for the matching post hook.
    Snapshotted,
    /// Nothing was enqueued.
    Skipped(SkipReason),
}

impl HookOutcome {
    /// Ids of the enqueued jobs, empty unless [`HookOutcome::Enqueued`].
    #[must_use]
    pub fn job_ids(&self) -> &[JobId] {
        match self {
            HookOutcome::Enqueued(ids) => ids,
            _ => &[],
        }
    }

    pub(crate) fn from_ids(ids: Vec<JobId>) -> Self {
        if ids.is_empty() {
            HookOutcome::Skipped(SkipReason::NothingToCapture)
        } else {
            HookOutcome::Enqueued(ids)
        }
    }
}

/// Mutation lifecycle hooks for one entity type.
///
/// Hooks run synchronously after (or just before) the source write. Their
/// errors are reported to the caller, which must not let them affect the
/// write itself.
pub trait CaptureLayer: Send + Sync {
    /// The watched type this layer captures.
    fn schema(&self) -> &Arc<WatchedEntityType>;

    /// Before a create or update commits: snapshot the stored identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the source store cannot be read.
    fn before_write(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        record: &Record,
    ) -> CaptureResult<HookOutcome>;

    /// After a create commits.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or enqueueing fails.
    fn after_create(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        record: &Record,
    ) -> CaptureResult<HookOutcome>;

    /// After an update commits.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or enqueueing fails.
    fn after_update(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        record: &Record,
    ) -> CaptureResult<HookOutcome>;

    /// After a delete commits. `record` is the pre-delete state.
    ///
    /// # Errors
    ///
    /// Returns an error if enqueueing fails.
    fn after_delete(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        record: &Record,
    ) -> CaptureResult<HookOutcome>;

    /// Before a many-to-many relation of `owner` is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation is unknown or the source store
    /// cannot be read.
    fn before_association_clear(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        owner: &Record,
        relation: &str,
    ) -> CaptureResult<HookOutcome>;

    /// After associations were added, removed or cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or enqueueing fails.
    fn after_association_changed(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        change: &AssociationChange,
    ) -> CaptureResult<HookOutcome>;
}

/// The standard capture layer: a schema plus a policy.
pub struct EntityCapture {
    schema: Arc<WatchedEntityType>,
    policy: Arc<dyn SyncPolicy>,
}

impl EntityCapture {
    /// Creates a layer with the default policy.
    #[must_use]
    pub fn new(schema: WatchedEntityType) -> Self {
        Self::with_policy(schema, Arc::new(AllowAll))
    }

    /// Creates a layer with a custom policy.
    #[must_use]
    pub fn with_policy(schema: WatchedEntityType, policy: Arc<dyn SyncPolicy>) -> Self {
        Self {
            schema: Arc::new(schema),
            policy,
        }
    }

    fn tracker(&self) -> RelationshipTracker<'_> {
        RelationshipTracker::new(&self.schema, self.policy.as_ref())
    }

    fn skip_raw(&self, hook: &str, record: &Record) -> HookOutcome {
        tracing::warn!(entity = %self.schema.key, record = %record, hook, "raw write not replicated");
        HookOutcome::Skipped(SkipReason::RawWrite)
    }

    fn deny(&self, hook: &str, record: &Record) -> HookOutcome {
        tracing::debug!(entity = %self.schema.key, record = %record, hook, "denied by policy");
        HookOutcome::Skipped(SkipReason::Denied)
    }
}

impl fmt::Debug for EntityCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCapture")
            .field("entity", &self.schema.key)
            .finish_non_exhaustive()
    }
}

impl CaptureLayer for EntityCapture {
    fn schema(&self) -> &Arc<WatchedEntityType> {
        &self.schema
    }

    fn before_write(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        record: &Record,
    ) -> CaptureResult<HookOutcome> {
        if ctx.raw {
            return Ok(HookOutcome::Skipped(SkipReason::RawWrite));
        }
        let Some(pk) = record.pk else {
            return Ok(HookOutcome::Skipped(SkipReason::NothingToCapture));
        };
        let Some(stored) = env.source.get(&self.schema.key, pk)? else {
            return Ok(HookOutcome::Skipped(SkipReason::NothingToCapture));
        };
        let identity = IdentityResolver::identity_of(&self.schema, &stored)?;
        tracing::trace!(entity = %self.schema.key, mutation = %ctx.mutation, identity = %identity, "snapshotted identity");
        env.snapshots.stash(ctx.mutation, Snapshot::Identity(identity));
        Ok(HookOutcome::Snapshotted)
    }

    fn after_create(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        record: &Record,
    ) -> CaptureResult<HookOutcome> {
        env.snapshots.take(ctx.mutation);
        if ctx.raw {
            return Ok(self.skip_raw("after_create", record));
        }
        if !self.policy.can_create(record) {
            return Ok(self.deny("after_create", record));
        }
        let payload = env.encoder().encode(&self.schema, record)?;
        let event = ChangeEvent::create(self.schema.key.clone(), payload);
        Ok(HookOutcome::Enqueued(vec![env.enqueue(&event)?]))
    }

    fn after_update(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        record: &Record,
    ) -> CaptureResult<HookOutcome> {
        let snapshot = env.snapshots.take(ctx.mutation);
        if ctx.raw {
            return Ok(self.skip_raw("after_update", record));
        }
        if !self.policy.can_update(record) {
            return Ok(self.deny("after_update", record));
        }
        let original = match snapshot {
            Some(Snapshot::Identity(identity)) => identity,
            _ => IdentityResolver::identity_of(&self.schema, record)?,
        };
        let payload = env.encoder().encode(&self.schema, record)?;
        let event = ChangeEvent::update(self.schema.key.clone(), original, payload);
        Ok(HookOutcome::Enqueued(vec![env.enqueue(&event)?]))
    }

    fn after_delete(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        record: &Record,
    ) -> CaptureResult<HookOutcome> {
        if ctx.raw {
            return Ok(self.skip_raw("after_delete", record));
        }
        if !self.policy.can_delete(record) {
            return Ok(self.deny("after_delete", record));
        }
        let reference = IdentityResolver::reference_of(&self.schema, record)?;
        let mut payload = Payload::new();
        payload.insert(PK_FIELD, reference.to_json());
        let event = ChangeEvent::delete(self.schema.key.clone(), payload);
        Ok(HookOutcome::Enqueued(vec![env.enqueue(&event)?]))
    }

    fn before_association_clear(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        owner: &Record,
        relation: &str,
    ) -> CaptureResult<HookOutcome> {
        if ctx.raw {
            return Ok(HookOutcome::Skipped(SkipReason::RawWrite));
        }
        self.tracker().before_clear(env, ctx, owner, relation)
    }

    fn after_association_changed(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        change: &AssociationChange,
    ) -> CaptureResult<HookOutcome> {
        if ctx.raw {
            env.snapshots.take(ctx.mutation);
            return Ok(self.skip_raw("after_association_changed", &change.owner));
        }
        self.tracker().after_change(env, ctx, change)
    }
}
