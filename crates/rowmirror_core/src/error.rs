//! Error types for capture, resolution, encoding and queueing.

use rowmirror_model::ModelError;
use rowmirror_protocol::{JobId, ProtocolError};
use rowmirror_store::StoreError;
use std::io;
use thiserror::Error;

/// Result type for identity resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Result type for encoding and decoding.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for capture hooks.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors raised while locating records by identity.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The entity type has no registered schema.
    #[error("unknown entity type {0}")]
    UnknownEntity(String),

    /// No record has the identity.
    #[error("{entity} {identity} not found")]
    NotFound {
        /// The entity type.
        entity: String,
        /// The identity that was looked up.
        identity: String,
    },

    /// More than one record has the identity.
    #[error("{entity} {identity} matches {count} records")]
    Ambiguous {
        /// The entity type.
        entity: String,
        /// The identity that was looked up.
        identity: String,
        /// How many records matched.
        count: usize,
    },

    /// The record or identity cannot identify anything.
    #[error("cannot identify {entity}: {reason}")]
    Unidentifiable {
        /// The entity type.
        entity: String,
        /// Why not.
        reason: String,
    },

    /// The store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ResolveError {
    /// Returns true if the lookup may succeed later.
    ///
    /// A miss is retryable: the job that creates the record may not have
    /// been applied yet.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolveError::NotFound { .. } => true,
            ResolveError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A reference could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The payload is malformed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl CodecError {
    /// Returns true if the operation may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            CodecError::Resolve(e) => e.is_retryable(),
            CodecError::Store(e) => e.is_transient(),
            CodecError::Protocol(_) => false,
        }
    }
}

/// Errors raised by job queues.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue cannot accept or deliver jobs right now.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// The job is not in flight.
    #[error("job {0} is not in flight")]
    UnknownJob(JobId),

    /// A stored job could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reading or writing a job file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl QueueError {
    /// Returns true if the operation may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

/// Errors raised inside capture hooks.
///
/// These never reach the originating write: the capture service logs and
/// counts them.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The schema or relation lookup failed.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Encoding the record failed.
    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),

    /// Identity computation failed.
    #[error("identity error: {0}")]
    Resolve(#[from] ResolveError),

    /// Reading the source store failed.
    #[error("source store error: {0}")]
    Store(#[from] StoreError),

    /// The job could not be enqueued.
    #[error("enqueue failed: {0}")]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found() -> ResolveError {
        ResolveError::NotFound {
            entity: "local.relatedmodel".into(),
            identity: "natural(\"foo\")".into(),
        }
    }

    #[test]
    fn retryable_errors() {
        assert!(not_found().is_retryable());
        assert!(ResolveError::Store(StoreError::LockConflict("x".into())).is_retryable());
        assert!(!ResolveError::UnknownEntity("a.b".into()).is_retryable());
        assert!(!ResolveError::Ambiguous {
            entity: "a.b".into(),
            identity: "pk=1".into(),
            count: 2
        }
        .is_retryable());

        assert!(CodecError::from(not_found()).is_retryable());
        assert!(!CodecError::Protocol(ProtocolError::InvalidPayload("x".into())).is_retryable());

        assert!(QueueError::Unavailable("down".into()).is_retryable());
        assert!(!QueueError::UnknownJob(JobId::new()).is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            not_found().to_string(),
            "local.relatedmodel natural(\"foo\") not found"
        );
        assert_eq!(
            CodecError::from(not_found()).to_string(),
            not_found().to_string()
        );
    }
}
