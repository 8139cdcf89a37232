//! # RowMirror Worker
//!
//! Replication side of the RowMirror pipeline.
//!
//! This crate provides:
//! - `ReplicationWorker`: decode, resolve and apply one job per target
//!   transaction
//! - Retry classification with exponential backoff and an attempt ceiling
//! - `WorkerRunner`: synchronous draining and an async loop on tokio with
//!   a watch-channel shutdown
//!
//! ## Job lifecycle
//!
//! ```text
//! Decode -> Resolve -> Apply -> Applied | Retry (backoff) | PermanentFailure
//! ```
//!
//! ## Key Invariants
//!
//! - A create never silently upserts: collisions are retryable failures
//! - An update or delete that cannot find its target is retried, not
//!   treated as success
//! - A permanent failure is logged exactly once, with the raw payload, and
//!   the job is dropped
//! - The source write is never affected by replication failures

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod runner;
mod worker;

pub use config::{RetryConfig, WorkerConfig};
pub use error::{ApplyError, ApplyResult, ConfigError};
pub use runner::{merge_summaries, spawn_pool, RunSummary, WorkerRunner};
pub use worker::{Applied, JobOutcome, ReplicationWorker, WorkerStats};
