//! Many-to-many change tracking.

use crate::capture::{CaptureEnv, HookOutcome, SkipReason, WriteContext};
use crate::error::CaptureResult;
use crate::identity::IdentityResolver;
use crate::policy::SyncPolicy;
use crate::snapshot::{AssociationPair, Snapshot};
use rowmirror_model::{ManyToManyDef, PrimaryKey, Record, WatchedEntityType};
use rowmirror_protocol::{ChangeEvent, Payload, Reference};
use rowmirror_store::Filter;

/// What happened to a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationAction {
    /// Counterparts with these primary keys were associated.
    Added(Vec<PrimaryKey>),
    /// Counterparts with these primary keys were dissociated.
    Removed(Vec<PrimaryKey>),
    /// Every counterpart was dissociated.
    Cleared,
}

/// A change to one many-to-many relation, seen from its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationChange {
    /// Relation name on the owner type.
    pub relation: String,
    /// The owner record.
    pub owner: Record,
    /// What happened.
    pub action: AssociationAction,
}

impl AssociationChange {
    /// Counterparts were associated.
    pub fn added(relation: impl Into<String>, owner: Record, others: Vec<PrimaryKey>) -> Self {
        Self {
            relation: relation.into(),
            owner,
            action: AssociationAction::Added(others),
        }
    }

    /// Counterparts were dissociated.
    pub fn removed(relation: impl Into<String>, owner: Record, others: Vec<PrimaryKey>) -> Self {
        Self {
            relation: relation.into(),
            owner,
            action: AssociationAction::Removed(others),
        }
    }

    /// The relation was cleared.
    pub fn cleared(relation: impl Into<String>, owner: Record) -> Self {
        Self {
            relation: relation.into(),
            owner,
            action: AssociationAction::Cleared,
        }
    }
}

/// Turns relation changes into association-entity jobs.
///
/// Added pairs become creates of the association row; removed and cleared
/// pairs become deletes keyed by both endpoint references. A bulk clear
/// needs the pairs captured by [`RelationshipTracker::before_clear`],
/// because afterwards the association rows are gone.
pub struct RelationshipTracker<'a> {
    schema: &'a WatchedEntityType,
    policy: &'a dyn SyncPolicy,
}

impl<'a> RelationshipTracker<'a> {
    /// Creates a tracker for relations owned by `schema`.
    #[must_use]
    pub fn new(schema: &'a WatchedEntityType, policy: &'a dyn SyncPolicy) -> Self {
        Self { schema, policy }
    }

    /// Stashes every currently associated pair of the relation.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation is unknown or the source store
    /// cannot be read.
    pub fn before_clear(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        owner: &Record,
        relation: &str,
    ) -> CaptureResult<HookOutcome> {
        let relation = self.schema.require_relation(relation)?;
        if !self.policy.can_remove_m2m(env.registry, self.schema, relation) {
            return Ok(self.denied(relation));
        }
        let Some(owner_pk) = owner.pk else {
            return Ok(HookOutcome::Skipped(SkipReason::NothingToCapture));
        };

        let resolver = env.resolver();
        let owner_ref = IdentityResolver::reference_of(self.schema, owner)?;
        let rows = env.source.find(
            &relation.through,
            &Filter::new().eq(relation.source_column.clone(), owner_pk),
        )?;
        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(other) = row.foreign_key(&relation.target_column) else {
                continue;
            };
            pairs.push(AssociationPair {
                owner: owner_ref.clone(),
                other: resolver.reference_to(&relation.target, other)?,
            });
        }

        tracing::debug!(
            entity = %self.schema.key,
            relation = %relation.name,
            mutation = %ctx.mutation,
            pairs = pairs.len(),
            "snapshotted associations before clear"
        );
        env.snapshots.stash(
            ctx.mutation,
            Snapshot::Associations {
                relation: relation.name.clone(),
                pairs,
            },
        );
        Ok(HookOutcome::Snapshotted)
    }

    /// Enqueues the jobs for a relation change.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation is unknown, the source store cannot
    /// be read, or enqueueing fails.
    pub fn after_change(
        &self,
        env: &CaptureEnv<'_>,
        ctx: &WriteContext,
        change: &AssociationChange,
    ) -> CaptureResult<HookOutcome> {
        let snapshot = env.snapshots.take(ctx.mutation);
        let relation = self.schema.require_relation(&change.relation)?;

        match &change.action {
            AssociationAction::Added(others) => {
                if !self.policy.can_add_m2m(env.registry, self.schema, relation) {
                    return Ok(self.denied(relation));
                }
                self.added(env, relation, &change.owner, others)
            }
            AssociationAction::Removed(others) => {
                if !self.policy.can_remove_m2m(env.registry, self.schema, relation) {
                    return Ok(self.denied(relation));
                }
                self.removed(env, relation, &change.owner, others)
            }
            AssociationAction::Cleared => {
                if !self.policy.can_remove_m2m(env.registry, self.schema, relation) {
                    return Ok(self.denied(relation));
                }
                self.cleared(env, relation, snapshot)
            }
        }
    }

    fn added(
        &self,
        env: &CaptureEnv<'_>,
        relation: &ManyToManyDef,
        owner: &Record,
        others: &[PrimaryKey],
    ) -> CaptureResult<HookOutcome> {
        let Some(owner_pk) = owner.pk else {
            return Ok(HookOutcome::Skipped(SkipReason::NothingToCapture));
        };
        let through = env.registry.require_schema(&relation.through)?;
        let encoder = env.encoder();

        let mut ids = Vec::with_capacity(others.len());
        for &other in others {
            let filter = Filter::new()
                .eq(relation.source_column.clone(), owner_pk)
                .eq(relation.target_column.clone(), other);
            let Some(row) = env.source.find(&relation.through, &filter)?.into_iter().next() else {
                tracing::warn!(
                    entity = %relation.through,
                    owner = owner_pk.get(),
                    other = other.get(),
                    "association row not found, skipping"
                );
                continue;
            };
            let payload = encoder.encode(through, &row)?;
            ids.push(env.enqueue(&ChangeEvent::create(relation.through.clone(), payload))?);
        }
        Ok(HookOutcome::from_ids(ids))
    }

    fn removed(
        &self,
        env: &CaptureEnv<'_>,
        relation: &ManyToManyDef,
        owner: &Record,
        others: &[PrimaryKey],
    ) -> CaptureResult<HookOutcome> {
        let resolver = env.resolver();
        let owner_ref = IdentityResolver::reference_of(self.schema, owner)?;

        let mut ids = Vec::with_capacity(others.len());
        for &other in others {
            let pair = AssociationPair {
                owner: owner_ref.clone(),
                other: resolver.reference_to(&relation.target, other)?,
            };
            ids.push(env.enqueue(&delete_event(relation, &pair))?);
        }
        Ok(HookOutcome::from_ids(ids))
    }

    fn cleared(
        &self,
        env: &CaptureEnv<'_>,
        relation: &ManyToManyDef,
        snapshot: Option<Snapshot>,
    ) -> CaptureResult<HookOutcome> {
        let pairs = match snapshot {
            Some(Snapshot::Associations { relation: name, pairs }) if name == relation.name => {
                pairs
            }
            _ => {
                tracing::warn!(
                    entity = %self.schema.key,
                    relation = %relation.name,
                    "relation cleared without a pre-clear snapshot, nothing replicated"
                );
                return Ok(HookOutcome::Skipped(SkipReason::NothingToCapture));
            }
        };

        let mut ids = Vec::with_capacity(pairs.len());
        for pair in &pairs {
            ids.push(env.enqueue(&delete_event(relation, pair))?);
        }
        Ok(HookOutcome::from_ids(ids))
    }

    fn denied(&self, relation: &ManyToManyDef) -> HookOutcome {
        tracing::debug!(
            entity = %self.schema.key,
            relation = %relation.name,
            "association change denied by policy"
        );
        HookOutcome::Skipped(SkipReason::Denied)
    }
}

/// Delete of one association row, keyed by both endpoint references.
fn delete_event(relation: &ManyToManyDef, pair: &AssociationPair) -> ChangeEvent {
    let mut payload = Payload::new();
    payload.insert(relation.source_column.clone(), pair.owner.to_json());
    payload.insert(relation.target_column.clone(), pair.other.to_json());
    ChangeEvent::delete(relation.through.clone(), payload)
}

/// References of a delete payload produced for an association, if it is one.
#[must_use]
pub fn association_endpoints(
    relation: &ManyToManyDef,
    payload: &Payload,
) -> Option<(Reference, Reference)> {
    let owner = payload.get(&relation.source_column).and_then(Reference::from_json)?;
    let other = payload.get(&relation.target_column).and_then(Reference::from_json)?;
    Some((owner, other))
}
