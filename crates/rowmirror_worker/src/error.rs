//! Error types for the replication worker.

use rowmirror_core::{CodecError, QueueError, ResolveError};
use rowmirror_model::ModelError;
use rowmirror_protocol::ProtocolError;
use rowmirror_store::StoreError;
use thiserror::Error;

/// Result type for applying jobs.
pub type ApplyResult<T> = Result<T, ApplyError>;

/// Errors in a worker configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The text is not a configuration.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The options are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur while applying a job to the target store.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// The job or its payload is malformed.
    #[error("malformed job: {0}")]
    Protocol(#[from] ProtocolError),

    /// The job is well-formed but cannot be applied as shipped.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// The payload references a relation or field the type lacks.
    #[error("schema error: {0}")]
    Model(#[from] ModelError),

    /// Decoding the payload failed.
    #[error("decode error: {0}")]
    Codec(#[from] CodecError),

    /// The target record could not be located.
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// A record with the same identity already exists in the target.
    #[error("{entity} {identity} already exists")]
    Collision {
        /// The entity type.
        entity: String,
        /// The colliding identity.
        identity: String,
    },

    /// The target store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The job queue failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl ApplyError {
    /// Returns true if the job may succeed on a later delivery.
    ///
    /// Misses and collisions are retryable because jobs of related records
    /// may be applied out of order.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApplyError::Codec(e) => e.is_retryable(),
            ApplyError::Resolve(e) => e.is_retryable(),
            ApplyError::Store(e) => e.is_transient(),
            ApplyError::Queue(e) => e.is_retryable(),
            ApplyError::Collision { .. } => true,
            ApplyError::Protocol(_) | ApplyError::InvalidJob(_) | ApplyError::Model(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ApplyError::from(StoreError::LockConflict("row".into())).is_retryable());
        assert!(ApplyError::from(ResolveError::NotFound {
            entity: "local.tag".into(),
            identity: "pk=1".into(),
        })
        .is_retryable());
        assert!(ApplyError::Collision {
            entity: "local.tag".into(),
            identity: "pk=1".into(),
        }
        .is_retryable());

        assert!(!ApplyError::InvalidJob("empty".into()).is_retryable());
        assert!(!ApplyError::from(ResolveError::UnknownEntity("local.x".into())).is_retryable());
        assert!(!ApplyError::from(StoreError::InvalidRecord("no pk".into())).is_retryable());
    }

    #[test]
    fn config_errors_display() {
        let err = ConfigError::Invalid("max_attempts must be at least 1".into());
        assert_eq!(err.to_string(), "invalid configuration: max_attempts must be at least 1");
        let parse = serde_json::from_str::<u32>("x").unwrap_err();
        assert!(ConfigError::from(parse).to_string().starts_with("parse error"));
    }
}
