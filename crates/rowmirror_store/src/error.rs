//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A concurrent writer holds a conflicting lock.
    #[error("lock conflict: {0}")]
    LockConflict(String),

    /// An insert or update would violate a uniqueness constraint.
    #[error("duplicate {entity}: {detail}")]
    Duplicate {
        /// The entity type.
        entity: String,
        /// Which key collided.
        detail: String,
    },

    /// No row has the given primary key.
    #[error("{entity} with pk {pk} not found")]
    NotFound {
        /// The entity type.
        entity: String,
        /// The missing primary key.
        pk: i64,
    },

    /// The record cannot be written as given.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The filter is not acceptable for the operation.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The transaction was rolled back.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// An I/O error occurred while loading or saving.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if retrying the same operation later may succeed.
    ///
    /// Connectivity, lock and constraint failures are transient: the
    /// conflicting row may be removed by a job that has not run yet.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::LockConflict(_) | StoreError::Duplicate { .. }
        )
    }
}
