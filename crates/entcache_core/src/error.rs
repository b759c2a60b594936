//! Error types for entcache core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A record was expected to carry an `id` field.
    #[error("record in entity {entity} has no id")]
    MissingRecordId {
        /// The entity the record belongs to.
        entity: String,
    },

    /// A record could not be converted to or from a typed value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::MissingRecordId {
            entity: "posts".into(),
        };
        assert_eq!(err.to_string(), "record in entity posts has no id");
    }
}
