use thiserror::Error;

/// Errors from repository operations (used by the store traits in phaseflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    /// A create-only write found an existing record, or a compare-and-swap
    /// observed a different version than expected.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Errors raised while parsing or validating a workflow definition document.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to parse workflow definition: {0}")]
    Parse(String),

    #[error("invalid workflow definition '{workflow}': {reason}")]
    Invalid { workflow: String, reason: String },
}
