//! # RowMirror Core
//!
//! Capture side of the RowMirror replication pipeline.
//!
//! This crate provides:
//! - Identity resolution (natural key or primary key)
//! - Change encoding and decoding of records into portable payloads
//! - Per-entity capture hooks and the many-to-many relationship tracker
//! - The registry of watched entity types
//! - Job queue traits and an in-memory queue
//! - `CaptureService`, the dispatcher the source data-access layer calls
//!
//! ## Architecture
//!
//! A mutation on the source store flows through:
//! 1. `before_write` snapshots the stored identity under a mutation id
//! 2. the write commits
//! 3. the post hook encodes the new state and enqueues a job
//!
//! Jobs are applied to the target store by `rowmirror_worker`.
//!
//! ## Key Invariants
//!
//! - Natural-keyed types never ship a bare primary key as their identity,
//!   except as a flagged fallback when the natural key is unpopulated
//! - Raw writes are never replicated
//! - Capture errors never reach the originating write

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod capture;
mod encoder;
mod error;
mod identity;
mod policy;
mod queue;
mod registry;
mod service;
mod snapshot;
mod tracker;

pub use capture::{CaptureEnv, CaptureLayer, EntityCapture, HookOutcome, SkipReason, WriteContext};
pub use encoder::{ChangeDecoder, ChangeEncoder, DecodedRecord, PendingAssociation, SkippedField};
pub use error::{
    CaptureError, CaptureResult, CodecError, CodecResult, QueueError, QueueResult, ResolveError,
    ResolveResult,
};
pub use identity::IdentityResolver;
pub use policy::{AllowAll, SyncPolicy};
pub use queue::{Delivery, JobQueue, JobSource, MemoryQueue};
pub use registry::Registry;
pub use service::{CaptureService, CaptureStats};
pub use snapshot::{AssociationPair, MutationId, Snapshot, SnapshotTable};
pub use tracker::{association_endpoints, AssociationAction, AssociationChange, RelationshipTracker};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
