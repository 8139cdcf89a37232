//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building or validating schema descriptors.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The schema definition is inconsistent.
    #[error("invalid schema for {entity}: {reason}")]
    InvalidSchema {
        /// The entity type being validated.
        entity: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An entity key string could not be parsed.
    #[error("invalid entity key '{0}': expected 'namespace.name'")]
    InvalidEntityKey(String),

    /// A field name was not declared on the entity type.
    #[error("unknown field '{field}' on {entity}")]
    UnknownField {
        /// The entity type.
        entity: String,
        /// The missing field name.
        field: String,
    },

    /// A many-to-many relation name was not declared on the entity type.
    #[error("unknown relation '{relation}' on {entity}")]
    UnknownRelation {
        /// The entity type.
        entity: String,
        /// The missing relation name.
        relation: String,
    },
}

impl ModelError {
    /// Creates an invalid-schema error.
    pub fn invalid_schema(entity: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ModelError::invalid_schema("blog.post", "duplicate field 'title'");
        assert_eq!(
            err.to_string(),
            "invalid schema for blog.post: duplicate field 'title'"
        );

        let err = ModelError::InvalidEntityKey("post".into());
        assert!(err.to_string().contains("namespace.name"));
    }
}
