//! Handlers for views.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use ontask_core::export::frame_to_csv;
use ontask_core::types::DbId;
use ontask_core::view::View;
use ontask_db::store::WorkflowStore;
use serde::Deserialize;
use validator::Validate;

use super::{explicit_null, parse_formula, FrameResponse};
use crate::error::AppResult;
use crate::middleware::auth::OwnedWorkflow;
use crate::response::{CsvDownload, DataResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateView {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[serde(default)]
    pub description_text: String,
    #[validate(length(min = 1))]
    pub columns: Vec<String>,
    pub filter: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateView {
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,
    pub description_text: Option<String>,
    pub columns: Option<Vec<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub filter: Option<Option<serde_json::Value>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CloneView {
    #[validate(length(min = 1, max = 256))]
    pub new_name: String,
}

/// GET /api/v1/workflows/{workflow_id}/views
pub async fn list(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
) -> AppResult<Json<DataResponse<Vec<View>>>> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    Ok(Json(DataResponse {
        data: workflow.views().to_vec(),
    }))
}

/// POST /api/v1/workflows/{workflow_id}/views
pub async fn create(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Json(input): Json<CreateView>,
) -> AppResult<(StatusCode, Json<View>)> {
    input.validate()?;
    let view = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let filter = input
            .filter
            .as_ref()
            .map(|json| parse_formula(json, &wf.time_zone))
            .transpose()?;
        let mut view = View::new(input.name, input.columns, filter);
        view.description_text = input.description_text;
        wf.add_view(view).cloned()
    })
    .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/workflows/{workflow_id}/views/{name}
pub async fn get_by_name(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
) -> AppResult<Json<View>> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    Ok(Json(workflow.view(&name)?.clone()))
}

/// PUT /api/v1/workflows/{workflow_id}/views/{name}
pub async fn update(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(input): Json<UpdateView>,
) -> AppResult<Json<View>> {
    input.validate()?;
    let view = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let filter = match &input.filter {
            None => None,
            Some(None) => Some(None),
            Some(Some(json)) => Some(Some(parse_formula(json, &wf.time_zone)?)),
        };
        wf.update_view(&name, input.name, input.columns, filter, input.description_text)
            .cloned()
    })
    .await?;
    Ok(Json(view))
}

/// DELETE /api/v1/workflows/{workflow_id}/views/{name}
pub async fn delete(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
) -> AppResult<StatusCode> {
    WorkflowStore::mutate(&state.pool, owned.id(), |wf| wf.delete_view(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/workflows/{workflow_id}/views/{name}/clone
pub async fn clone(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(input): Json<CloneView>,
) -> AppResult<(StatusCode, Json<View>)> {
    input.validate()?;
    let view = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        wf.clone_view(&name, &input.new_name).cloned()
    })
    .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/workflows/{workflow_id}/views/{name}/data
pub async fn data(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
) -> AppResult<Json<FrameResponse>> {
    let mut workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    let frame = workflow.view_data(&name)?;
    Ok(Json(FrameResponse::from(&frame)))
}

/// GET /api/v1/workflows/{workflow_id}/views/{name}/csv
pub async fn export_csv(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
) -> AppResult<CsvDownload> {
    let mut workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    let frame = workflow.view_data(&name)?;
    Ok(CsvDownload(frame_to_csv(&frame, &workflow.time_zone)))
}
