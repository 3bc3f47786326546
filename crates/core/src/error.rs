use crate::merge::MergeError;
use crate::template::TemplateError;
use crate::transport::TransportError;
use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// Columns, actions, conditions and views are addressed by name inside a
    /// workflow.
    #[error("{entity} '{name}' not found")]
    NamedNotFound { entity: &'static str, name: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Key column constraint violated: {0}")]
    KeyColumnConstraintViolation(String),

    #[error("Value '{value}' is not an allowed category of column '{column}'")]
    CategoryViolation { column: String, value: String },

    #[error("The merge produced an empty table")]
    EmptyMergeResult,

    #[error("Merge rejected: {0}")]
    Merge(#[from] MergeError),

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Malformed formula: {0}")]
    MalformedFormula(String),

    #[error("Template error: {0}")]
    TemplateRender(#[from] TemplateError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn named_not_found(entity: &'static str, name: impl Into<String>) -> Self {
        CoreError::NamedNotFound {
            entity,
            name: name.into(),
        }
    }

    /// Whether the error leaves the caller's state untouched and can be shown
    /// to the user as-is.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            CoreError::BackendUnavailable(_) | CoreError::Internal(_)
        )
    }
}
