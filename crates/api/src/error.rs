use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ontask_core::error::CoreError;
use ontask_db::store::StoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Every variant renders as `{ "error": <message>, "code": <CODE> }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Core(e) => AppError::Core(e),
            StoreError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Core(CoreError::Validation(errors.to_string()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Database(err) => classify_sqlx_error(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn unavailable() -> (StatusCode, &'static str, String) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "BACKEND_UNAVAILABLE",
        "The storage backend is unavailable, try again later".to_string(),
    )
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    let message = err.to_string();
    match err {
        CoreError::NotFound { entity, .. } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} not found"),
        ),
        CoreError::NamedNotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", message),
        CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message),
        CoreError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", message),
        CoreError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message),
        CoreError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN", message),
        CoreError::SchemaMismatch(_) => (StatusCode::BAD_REQUEST, "SCHEMA_MISMATCH", message),
        CoreError::KeyColumnConstraintViolation(_) => {
            (StatusCode::BAD_REQUEST, "KEY_COLUMN_CONSTRAINT", message)
        }
        CoreError::CategoryViolation { .. } => {
            (StatusCode::BAD_REQUEST, "CATEGORY_VIOLATION", message)
        }
        CoreError::EmptyMergeResult => (StatusCode::BAD_REQUEST, "EMPTY_MERGE_RESULT", message),
        CoreError::Merge(_) => (StatusCode::BAD_REQUEST, "MERGE_REJECTED", message),
        CoreError::UnknownColumn(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_COLUMN", message),
        CoreError::TypeMismatch(_) => (StatusCode::BAD_REQUEST, "TYPE_MISMATCH", message),
        CoreError::MalformedFormula(_) => (StatusCode::BAD_REQUEST, "MALFORMED_FORMULA", message),
        CoreError::TemplateRender(_) => (StatusCode::BAD_REQUEST, "TEMPLATE_ERROR", message),
        CoreError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR", message),
        CoreError::Cancelled => (StatusCode::CONFLICT, "CANCELLED", message),
        CoreError::BackendUnavailable(msg) => {
            tracing::error!(error = %msg, "Storage backend unavailable");
            unavailable()
        }
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations map to 409.
/// - Pool exhaustion and connection failures map to 503.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            tracing::debug!(constraint = ?db_err.constraint(), "Unique constraint violated");
            (
                StatusCode::CONFLICT,
                "CONFLICT",
                "A record with the same name already exists".to_string(),
            )
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            tracing::error!(error = %err, "Database unreachable");
            unavailable()
        }
        other => {
            tracing::error!(error = %other, "Database error");
            internal()
        }
    }
}
