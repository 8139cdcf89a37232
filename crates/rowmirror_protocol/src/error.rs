//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding jobs.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The text is not valid JSON of the expected shape.
    #[error("invalid job JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The operation name is not one of create, update, delete.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// The job envelope is structurally wrong.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// The payload is not a JSON object.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
