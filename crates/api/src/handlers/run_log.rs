use axum::extract::{Query, State};
use axum::Json;
use ontask_core::error::CoreError;
use ontask_db::models::run_log::RunLog;
use ontask_db::repositories::{ActionRepo, RunLogRepo};

use crate::error::AppResult;
use crate::middleware::auth::OwnedWorkflow;
use crate::query::RunLogParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/workflows/{workflow_id}/run-logs?action=&limit=
pub async fn list(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Query(params): Query<RunLogParams>,
) -> AppResult<Json<DataResponse<Vec<RunLog>>>> {
    let action_id = match params.action.as_deref() {
        None => None,
        Some(name) => {
            let actions = ActionRepo::list(&state.pool, owned.id()).await?;
            let action = actions
                .into_iter()
                .find(|a| a.name == name)
                .ok_or_else(|| CoreError::named_not_found("Action", name))?;
            Some(action.id)
        }
    };
    let logs = RunLogRepo::list(&state.pool, owned.id(), action_id, params.limit).await?;
    Ok(Json(DataResponse { data: logs }))
}
