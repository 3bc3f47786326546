//! Handlers for the `/workflows` resource and workflow attributes.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use ontask_core::action::ActionType;
use ontask_core::column::Column;
use ontask_core::error::CoreError;
use ontask_core::types::{parse_time_zone, DbId, TimeZone};
use ontask_core::workflow::Workflow;
use ontask_db::models::workflow::{CreateWorkflow, UpdateWorkflow, WorkflowRow};
use ontask_db::repositories::workflow_repo::attributes_from_json;
use ontask_db::repositories::WorkflowRepo;
use ontask_db::store::WorkflowStore;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::{AuthUser, OwnedWorkflow};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ActionSummary {
    pub name: String,
    pub action_type: ActionType,
    pub description_text: String,
}

/// A workflow header with the names of what it holds.
#[derive(Debug, Serialize)]
pub struct WorkflowDetail {
    #[serde(flatten)]
    pub workflow: WorkflowRow,
    pub columns: Vec<Column>,
    pub actions: Vec<ActionSummary>,
    pub views: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CloneWorkflow {
    #[validate(length(min = 1, max = 512))]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetAttribute {
    pub value: String,
}

fn time_zone_or(text: Option<&str>, default: TimeZone) -> Result<TimeZone, CoreError> {
    match text {
        None => Ok(default),
        Some(text) => parse_time_zone(text).ok_or_else(|| {
            CoreError::Validation(format!("'{text}' is not a UTC offset such as +10:00"))
        }),
    }
}

async fn header(state: &AppState, id: DbId) -> AppResult<WorkflowRow> {
    WorkflowRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Workflow",
            id,
        }))
}

/// POST /api/v1/workflows
pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<CreateWorkflow>,
) -> AppResult<(StatusCode, Json<WorkflowRow>)> {
    input.validate()?;
    let mut workflow = Workflow::new(user.user_id, input.name);
    workflow.description_text = input.description_text;
    workflow.time_zone = time_zone_or(input.time_zone.as_deref(), state.config.time_zone)?;

    let id = WorkflowStore::create(&state.pool, &workflow).await?;
    Ok((StatusCode::CREATED, Json(header(&state, id).await?)))
}

/// GET /api/v1/workflows
pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<Vec<WorkflowRow>>>> {
    let workflows = WorkflowRepo::list_for_owner(&state.pool, user.user_id).await?;
    Ok(Json(DataResponse { data: workflows }))
}

/// GET /api/v1/workflows/{workflow_id}
pub async fn get_by_id(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
) -> AppResult<Json<WorkflowDetail>> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    Ok(Json(WorkflowDetail {
        workflow: owned.workflow,
        columns: workflow.columns().to_vec(),
        actions: workflow
            .actions()
            .iter()
            .map(|a| ActionSummary {
                name: a.name.clone(),
                action_type: a.action_type,
                description_text: a.description_text.clone(),
            })
            .collect(),
        views: workflow.views().iter().map(|v| v.name.clone()).collect(),
    }))
}

/// PUT /api/v1/workflows/{workflow_id}
pub async fn update(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Json(input): Json<UpdateWorkflow>,
) -> AppResult<Json<WorkflowRow>> {
    input.validate()?;
    WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        if let Some(name) = input.name {
            wf.name = name;
        }
        if let Some(description) = input.description_text {
            wf.description_text = description;
        }
        wf.time_zone = time_zone_or(input.time_zone.as_deref(), wf.time_zone)?;
        Ok(())
    })
    .await?;
    Ok(Json(header(&state, owned.id()).await?))
}

/// DELETE /api/v1/workflows/{workflow_id}
pub async fn delete(State(state): State<AppState>, owned: OwnedWorkflow) -> AppResult<StatusCode> {
    let id = owned.id();
    if WorkflowStore::delete(&state.pool, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::Core(CoreError::NotFound {
            entity: "Workflow",
            id,
        }))
    }
}

/// POST /api/v1/workflows/{workflow_id}/clone
pub async fn clone(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Json(input): Json<CloneWorkflow>,
) -> AppResult<(StatusCode, Json<WorkflowRow>)> {
    input.validate()?;
    let source = WorkflowStore::load(&state.pool, owned.id()).await?;
    let copy = source.clone_detached(input.name);
    let id = WorkflowStore::create(&state.pool, &copy).await?;
    tracing::info!(source = owned.id(), workflow_id = id, "Workflow cloned");
    Ok((StatusCode::CREATED, Json(header(&state, id).await?)))
}

/// GET /api/v1/workflows/{workflow_id}/query-builder-ops
///
/// Operand descriptions for the condition editor, rebuilt when stale.
pub async fn query_builder_ops(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
) -> AppResult<Json<serde_json::Value>> {
    if let Some(ops) = owned.workflow.query_builder_ops {
        return Ok(Json(ops));
    }
    let ops = WorkflowStore::mutate(&state.pool, owned.id(), |wf| Ok(wf.query_builder_ops().clone())).await?;
    Ok(Json(ops))
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// GET /api/v1/workflows/{workflow_id}/attributes
pub async fn list_attributes(owned: OwnedWorkflow) -> Json<BTreeMap<String, String>> {
    Json(attributes_from_json(&owned.workflow.attributes))
}

/// PUT /api/v1/workflows/{workflow_id}/attributes/{name}
pub async fn set_attribute(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(input): Json<SetAttribute>,
) -> AppResult<Json<BTreeMap<String, String>>> {
    let attributes = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        wf.set_attribute(&name, input.value)?;
        Ok(wf.attributes.clone())
    })
    .await?;
    Ok(Json(attributes))
}

/// DELETE /api/v1/workflows/{workflow_id}/attributes/{name}
pub async fn delete_attribute(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
) -> AppResult<StatusCode> {
    WorkflowStore::mutate(&state.pool, owned.id(), |wf| wf.remove_attribute(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}
