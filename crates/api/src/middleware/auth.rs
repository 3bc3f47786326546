//! JWT-based authentication extractors for Axum handlers.

use std::collections::HashMap;

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use ontask_core::error::CoreError;
use ontask_core::types::DbId;
use ontask_db::models::workflow::WorkflowRow;
use ontask_db::repositories::WorkflowRepo;

use crate::auth::jwt::validate_token;
use crate::error::AppError;
use crate::state::AppState;

/// Caller identity from a JWT Bearer token in the `Authorization` header.
///
/// ```ignore
/// async fn my_handler(user: AuthUser) -> AppResult<Json<()>> {
///     tracing::info!(user_id = user.user_id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: DbId,
    pub role: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(
                    "Missing Authorization header".into(),
                ))
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Invalid Authorization format. Expected: Bearer <token>".into(),
            ))
        })?;

        let claims = validate_token(token, &state.config.jwt).map_err(|_| {
            AppError::Core(CoreError::Unauthorized("Invalid or expired token".into()))
        })?;

        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}

/// The `{workflow_id}` path segment, resolved and checked to belong to the
/// caller. Rejects with 404 when the workflow does not exist and 403 when
/// someone else owns it.
#[derive(Debug, Clone)]
pub struct OwnedWorkflow {
    pub user: AuthUser,
    pub workflow: WorkflowRow,
}

impl OwnedWorkflow {
    pub fn id(&self) -> DbId {
        self.workflow.id
    }
}

impl FromRequestParts<AppState> for OwnedWorkflow {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;

        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        let id: DbId = params
            .get("workflow_id")
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| AppError::BadRequest("Invalid workflow id".into()))?;

        let workflow = WorkflowRepo::find_by_id(&state.pool, id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Workflow",
                id,
            })?;
        if workflow.owner_id != user.user_id {
            tracing::warn!(workflow_id = id, user_id = user.user_id, "Workflow access denied");
            return Err(AppError::Core(CoreError::Forbidden(
                "You do not own this workflow".into(),
            )));
        }

        Ok(OwnedWorkflow { user, workflow })
    }
}
