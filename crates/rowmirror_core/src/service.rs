//! Capture dispatcher called by the source data-access layer.

use crate::capture::{CaptureEnv, CaptureLayer, HookOutcome, SkipReason, WriteContext};
use crate::error::CaptureResult;
use crate::queue::JobQueue;
use crate::registry::Registry;
use crate::snapshot::SnapshotTable;
use crate::tracker::AssociationChange;
use parking_lot::RwLock;
use rowmirror_model::{EntityKey, Record};
use rowmirror_store::RecordStore;
use std::sync::Arc;

/// Counters over post-write hook outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Jobs enqueued.
    pub enqueued: u64,
    /// Hooks skipped for any reason other than a policy denial.
    pub skipped: u64,
    /// Hooks denied by policy.
    pub denied: u64,
    /// Hooks that failed.
    pub failed: u64,
}

/// Routes mutation notifications to the registered capture layers.
///
/// Capture never fails the originating write: every hook error is logged
/// and counted, and the entry point returns `None`.
pub struct CaptureService {
    registry: Arc<Registry>,
    source: Arc<dyn RecordStore>,
    queue: Arc<dyn JobQueue>,
    snapshots: SnapshotTable,
    stats: RwLock<CaptureStats>,
}

impl CaptureService {
    /// Creates a service reading `source` and enqueueing into `queue`.
    pub fn new(
        registry: Arc<Registry>,
        source: Arc<dyn RecordStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            registry,
            source,
            queue,
            snapshots: SnapshotTable::new(),
            stats: RwLock::new(CaptureStats::default()),
        }
    }

    /// The registry in use.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Gets the current stats.
    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        self.stats.read().clone()
    }

    /// Snapshots stashed by pre hooks and not yet taken.
    #[must_use]
    pub fn pending_snapshots(&self) -> usize {
        self.snapshots.len()
    }

    /// Before a create or update of `record` commits.
    pub fn before_write(&self, ctx: &WriteContext, record: &Record) -> Option<HookOutcome> {
        self.dispatch(&record.entity, "before_write", false, |layer, env| {
            layer.before_write(env, ctx, record)
        })
    }

    /// Drops whatever the pre hooks of `ctx` stashed.
    ///
    /// Call this when the source write fails, since no post hook will run
    /// to take the snapshot.
    pub fn abandon(&self, ctx: &WriteContext) {
        if self.snapshots.take(ctx.mutation).is_some() {
            tracing::debug!(mutation = %ctx.mutation, "write abandoned, snapshot dropped");
        }
    }

    /// After a save of `record` commits.
    pub fn record_saved(
        &self,
        ctx: &WriteContext,
        record: &Record,
        created: bool,
    ) -> Option<HookOutcome> {
        let hook = if created { "after_create" } else { "after_update" };
        self.dispatch(&record.entity, hook, true, |layer, env| {
            if created {
                layer.after_create(env, ctx, record)
            } else {
                layer.after_update(env, ctx, record)
            }
        })
    }

    /// After a delete of `record` commits. `record` is the pre-delete state.
    pub fn record_deleted(&self, ctx: &WriteContext, record: &Record) -> Option<HookOutcome> {
        self.dispatch(&record.entity, "after_delete", true, |layer, env| {
            layer.after_delete(env, ctx, record)
        })
    }

    /// Before a many-to-many relation of `owner` is cleared.
    pub fn before_association_clear(
        &self,
        ctx: &WriteContext,
        owner: &Record,
        relation: &str,
    ) -> Option<HookOutcome> {
        self.dispatch(&owner.entity, "before_association_clear", false, |layer, env| {
            layer.before_association_clear(env, ctx, owner, relation)
        })
    }

    /// After associations of `change.owner` were added, removed or cleared.
    pub fn association_changed(
        &self,
        ctx: &WriteContext,
        change: &AssociationChange,
    ) -> Option<HookOutcome> {
        self.dispatch(&change.owner.entity, "after_association_changed", true, |layer, env| {
            layer.after_association_changed(env, ctx, change)
        })
    }

    fn dispatch<F>(&self, entity: &EntityKey, hook: &str, counted: bool, run: F) -> Option<HookOutcome>
    where
        F: FnOnce(&dyn CaptureLayer, &CaptureEnv<'_>) -> CaptureResult<HookOutcome>,
    {
        let Some(layer) = self.registry.layer(entity) else {
            tracing::trace!(entity = %entity, hook, "unregistered entity type");
            let outcome = HookOutcome::Skipped(SkipReason::Unregistered);
            if counted {
                self.count(&outcome);
            }
            return Some(outcome);
        };
        let env = CaptureEnv {
            registry: &self.registry,
            source: self.source.as_ref(),
            queue: self.queue.as_ref(),
            snapshots: &self.snapshots,
        };

        match run(layer.as_ref(), &env) {
            Ok(outcome) => {
                if counted {
                    self.count(&outcome);
                }
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(entity = %entity, hook, error = %e, "capture failed, change not replicated");
                self.stats.write().failed += 1;
                None
            }
        }
    }

    fn count(&self, outcome: &HookOutcome) {
        let mut stats = self.stats.write();
        match outcome {
            HookOutcome::Enqueued(ids) => stats.enqueued += ids.len() as u64,
            HookOutcome::Skipped(SkipReason::Denied) => stats.denied += 1,
            HookOutcome::Skipped(_) => stats.skipped += 1,
            HookOutcome::Snapshotted => {}
        }
    }
}

impl std::fmt::Debug for CaptureService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureService")
            .field("registry", &self.registry)
            .field("stats", &*self.stats.read())
            .finish_non_exhaustive()
    }
}
