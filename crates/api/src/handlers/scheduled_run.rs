//! Handlers for scheduled action runs.
//!
//! The API only records schedule entries; `ontask-worker` claims and runs
//! them when they fall due.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use ontask_core::error::CoreError;
use ontask_core::scheduling::state_machine::status_name;
use ontask_core::types::DbId;
use ontask_db::models::scheduled_run::{CreateScheduledRun, ScheduledRun};
use ontask_db::repositories::ScheduledRunRepo;
use ontask_db::store::WorkflowStore;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::OwnedWorkflow;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/workflows/{workflow_id}/actions/{name}/schedule
///
/// Scheduling the same action twice for the same instant returns the
/// existing entry.
pub async fn create(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, action)): Path<(DbId, String)>,
    Json(input): Json<CreateScheduledRun>,
) -> AppResult<(StatusCode, Json<ScheduledRun>)> {
    if input.scheduled_at <= chrono::Utc::now() {
        return Err(AppError::Core(CoreError::Validation(
            "A run can only be scheduled in the future".into(),
        )));
    }
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    let action_id = workflow
        .action(&action)?
        .id
        .ok_or_else(|| AppError::InternalError(format!("Action '{action}' has no id")))?;

    let run = ScheduledRunRepo::create(&state.pool, owned.id(), action_id, owned.user.user_id, &input).await?;
    tracing::info!(
        workflow_id = owned.id(),
        action = %action,
        scheduled_run_id = run.id,
        scheduled_at = %run.scheduled_at,
        "Action run scheduled"
    );
    Ok((StatusCode::CREATED, Json(run)))
}

/// GET /api/v1/workflows/{workflow_id}/scheduled-runs
pub async fn list(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
) -> AppResult<Json<DataResponse<Vec<ScheduledRun>>>> {
    let runs = ScheduledRunRepo::list_for_workflow(&state.pool, owned.id()).await?;
    Ok(Json(DataResponse { data: runs }))
}

/// POST /api/v1/workflows/{workflow_id}/scheduled-runs/{run_id}/cancel
///
/// A running entry is cancelled too; the worker stops it before its next
/// row.
pub async fn cancel(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, run_id)): Path<(DbId, DbId)>,
) -> AppResult<Json<ScheduledRun>> {
    let existing = ScheduledRunRepo::find_by_id(&state.pool, run_id)
        .await?
        .filter(|run| run.workflow_id == owned.id())
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "ScheduledRun",
            id: run_id,
        }))?;

    match ScheduledRunRepo::cancel(&state.pool, run_id).await? {
        Some(run) => {
            tracing::info!(scheduled_run_id = run_id, "Scheduled run cancelled");
            Ok(Json(run))
        }
        None => Err(AppError::Core(CoreError::Conflict(format!(
            "Scheduled run {run_id} is already {}",
            status_name(existing.status_id).to_lowercase()
        )))),
    }
}
