//! Handlers for workflow columns.
//!
//! Every change goes through the workflow aggregate so conditions, actions
//! and views that mention a column follow it.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use ontask_core::column::Column;
use ontask_core::error::CoreError;
use ontask_core::statistics::ColumnStatistics;
use ontask_core::types::{DbId, TimeZone, Timestamp};
use ontask_core::value::{Cell, DataType, Value};
use ontask_core::workflow::{CascadeReport, ColumnSpec, ColumnUpdate};
use ontask_db::store::WorkflowStore;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::explicit_null;
use crate::error::AppResult;
use crate::middleware::auth::OwnedWorkflow;
use crate::query::StatisticsParams;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct AddColumn {
    #[validate(length(min = 1, max = 512))]
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub description_text: String,
    #[serde(default)]
    pub is_key: bool,
    #[serde(default)]
    pub categories: Vec<serde_json::Value>,
    pub active_from: Option<Timestamp>,
    pub active_to: Option<Timestamp>,
    /// Value every existing row starts with.
    #[serde(default)]
    pub initial: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateColumn {
    pub description_text: Option<String>,
    pub is_key: Option<bool>,
    pub categories: Option<Vec<serde_json::Value>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub active_from: Option<Option<Timestamp>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub active_to: Option<Option<Timestamp>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewColumnName {
    #[validate(length(min = 1, max = 512))]
    pub new_name: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveColumn {
    /// 1-based target position.
    pub position: usize,
}

#[derive(Debug, Serialize)]
pub struct RenameResult {
    pub column: Column,
    pub updated_actions: Vec<String>,
}

fn categories(values: &[serde_json::Value], data_type: DataType, tz: &TimeZone) -> Result<Vec<Value>, CoreError> {
    values
        .iter()
        .map(|v| Value::operand_from_json(v, data_type, tz))
        .collect()
}

/// GET /api/v1/workflows/{workflow_id}/columns
pub async fn list(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
) -> AppResult<Json<DataResponse<Vec<Column>>>> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    Ok(Json(DataResponse {
        data: workflow.columns().to_vec(),
    }))
}

/// POST /api/v1/workflows/{workflow_id}/columns
pub async fn add(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Json(input): Json<AddColumn>,
) -> AppResult<(StatusCode, Json<Column>)> {
    input.validate()?;
    let column = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let tz = wf.time_zone;
        let initial: Cell = Value::from_json(&input.initial, input.data_type, &tz)?;
        let spec = ColumnSpec {
            name: input.name,
            data_type: input.data_type,
            description_text: input.description_text,
            is_key: input.is_key,
            categories: categories(&input.categories, input.data_type, &tz)?,
            active_from: input.active_from,
            active_to: input.active_to,
            initial,
        };
        wf.add_column(spec).cloned()
    })
    .await?;
    Ok((StatusCode::CREATED, Json(column)))
}

/// PUT /api/v1/workflows/{workflow_id}/columns/{name}
pub async fn update(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(input): Json<UpdateColumn>,
) -> AppResult<Json<Column>> {
    let column = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let data_type = wf.column(&name)?.data_type;
        let categories = input
            .categories
            .as_deref()
            .map(|values| categories(values, data_type, &wf.time_zone))
            .transpose()?;
        let update = ColumnUpdate {
            description_text: input.description_text,
            is_key: input.is_key,
            categories,
            active_from: input.active_from,
            active_to: input.active_to,
        };
        wf.update_column(&name, update).cloned()
    })
    .await?;
    Ok(Json(column))
}

/// POST /api/v1/workflows/{workflow_id}/columns/{name}/rename
pub async fn rename(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(input): Json<NewColumnName>,
) -> AppResult<Json<RenameResult>> {
    input.validate()?;
    let result = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let updated_actions = wf.rename_column(&name, &input.new_name)?;
        Ok(RenameResult {
            column: wf.column(&input.new_name)?.clone(),
            updated_actions,
        })
    })
    .await?;
    Ok(Json(result))
}

/// POST /api/v1/workflows/{workflow_id}/columns/{name}/copy
pub async fn copy(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(input): Json<NewColumnName>,
) -> AppResult<(StatusCode, Json<Column>)> {
    input.validate()?;
    let column = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        wf.copy_column(&name, &input.new_name).cloned()
    })
    .await?;
    Ok((StatusCode::CREATED, Json(column)))
}

/// POST /api/v1/workflows/{workflow_id}/columns/{name}/move
pub async fn move_to(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(input): Json<MoveColumn>,
) -> AppResult<Json<DataResponse<Vec<Column>>>> {
    let columns = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        wf.move_column(&name, input.position)?;
        Ok(wf.columns().to_vec())
    })
    .await?;
    Ok(Json(DataResponse { data: columns }))
}

/// GET /api/v1/workflows/{workflow_id}/columns/{name}/delete-preview
///
/// What deleting the column would remove or change.
pub async fn delete_preview(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
) -> AppResult<Json<CascadeReport>> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    Ok(Json(workflow.column_delete_closure(&name)?))
}

/// DELETE /api/v1/workflows/{workflow_id}/columns/{name}
pub async fn delete(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
) -> AppResult<Json<CascadeReport>> {
    let report = WorkflowStore::mutate(&state.pool, owned.id(), |wf| wf.delete_column(&name)).await?;
    Ok(Json(report))
}

/// GET /api/v1/workflows/{workflow_id}/columns/{name}/statistics
pub async fn statistics(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Query(params): Query<StatisticsParams>,
) -> AppResult<Json<ColumnStatistics>> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    Ok(Json(workflow.column_statistics(&name, params.view.as_deref())?))
}
