//! Handlers for actions: CRUD, filter, preview and immediate runs.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use ontask_core::action::{Action, ActionColumnConditionTuple, ActionType};
use ontask_core::rubric::RubricCell;
use ontask_core::run::{RowStatus, RunOptions, RunReport};
use ontask_core::transport::Artifact;
use ontask_core::types::DbId;
use ontask_core::value::cell_to_json;
use ontask_db::store::WorkflowStore;
use ontask_events::{run_action, RunTarget};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use super::{explicit_null, parse_formula};
use crate::error::AppResult;
use crate::middleware::auth::OwnedWorkflow;
use crate::query::PreviewParams;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAction {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub description_text: String,
    #[serde(default)]
    pub text_content: String,
    #[validate(url)]
    pub target_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAction {
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,
    pub description_text: Option<String>,
    pub text_content: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub target_url: Option<Option<String>>,
    pub column_condition_tuples: Option<Vec<ActionColumnConditionTuple>>,
    pub rubric_cells: Option<Vec<RubricCell>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CloneAction {
    #[validate(length(min = 1, max = 256))]
    pub new_name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetFilter {
    /// `null` removes the filter.
    pub formula: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ConditionCount {
    pub name: String,
    pub n_rows_selected: usize,
}

/// One rendered row with its neighbours for paging.
#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub index: usize,
    pub total: usize,
    pub prev: usize,
    pub next: usize,
    pub row_key: serde_json::Value,
    pub recipient: Option<String>,
    pub conditions: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /api/v1/workflows/{workflow_id}/actions
pub async fn list(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
) -> AppResult<Json<DataResponse<Vec<Action>>>> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    Ok(Json(DataResponse {
        data: workflow.actions().to_vec(),
    }))
}

/// POST /api/v1/workflows/{workflow_id}/actions
pub async fn create(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Json(input): Json<CreateAction>,
) -> AppResult<(StatusCode, Json<Action>)> {
    input.validate()?;
    let action = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let mut action = Action::new(input.name, input.action_type);
        action.description_text = input.description_text;
        action.target_url = input.target_url;
        action.set_text_content(input.text_content)?;
        wf.add_action(action).cloned()
    })
    .await?;
    tracing::info!(workflow_id = owned.id(), action = %action.name, "Action created");
    Ok((StatusCode::CREATED, Json(action)))
}

/// GET /api/v1/workflows/{workflow_id}/actions/{name}
pub async fn get_by_name(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
) -> AppResult<Json<Action>> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    Ok(Json(workflow.action(&name)?.clone()))
}

/// PUT /api/v1/workflows/{workflow_id}/actions/{name}
pub async fn update(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(input): Json<UpdateAction>,
) -> AppResult<Json<Action>> {
    input.validate()?;
    let action = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        wf.edit_action(&name, |action| {
            if let Some(new_name) = input.name {
                action.name = new_name;
            }
            if let Some(description) = input.description_text {
                action.description_text = description;
            }
            if let Some(target_url) = input.target_url {
                action.target_url = target_url;
            }
            if let Some(tuples) = input.column_condition_tuples {
                action.column_condition_tuples = tuples;
            }
            if let Some(cells) = input.rubric_cells {
                action.rubric_cells = cells;
            }
            if let Some(text) = input.text_content {
                action.set_text_content(text)?;
            }
            Ok(())
        })
        .cloned()
    })
    .await?;
    Ok(Json(action))
}

/// DELETE /api/v1/workflows/{workflow_id}/actions/{name}
pub async fn delete(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
) -> AppResult<StatusCode> {
    WorkflowStore::mutate(&state.pool, owned.id(), |wf| wf.delete_action(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/workflows/{workflow_id}/actions/{name}/clone
pub async fn clone(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(input): Json<CloneAction>,
) -> AppResult<(StatusCode, Json<Action>)> {
    input.validate()?;
    let action = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        wf.clone_action(&name, &input.new_name).cloned()
    })
    .await?;
    Ok((StatusCode::CREATED, Json(action)))
}

/// PUT /api/v1/workflows/{workflow_id}/actions/{name}/filter
pub async fn set_filter(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(input): Json<SetFilter>,
) -> AppResult<Json<Action>> {
    let action = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let formula = input
            .formula
            .as_ref()
            .map(|json| parse_formula(json, &wf.time_zone))
            .transpose()?;
        wf.set_filter(&name, formula).cloned()
    })
    .await?;
    Ok(Json(action))
}

/// POST /api/v1/workflows/{workflow_id}/actions/{name}/condition-counts
///
/// Fill stale row counts of the action's conditions and return them.
pub async fn condition_counts(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
) -> AppResult<Json<DataResponse<Vec<ConditionCount>>>> {
    let counts = WorkflowStore::mutate(&state.pool, owned.id(), |wf| wf.refresh_condition_counts(&name)).await?;
    Ok(Json(DataResponse {
        data: counts
            .into_iter()
            .map(|(name, n_rows_selected)| ConditionCount { name, n_rows_selected })
            .collect(),
    }))
}

/// GET /api/v1/workflows/{workflow_id}/actions/{name}/preview?index=
pub async fn preview(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Query(params): Query<PreviewParams>,
) -> AppResult<Json<PreviewResponse>> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    let ctx = workflow.run_context(&name, chrono::Utc::now())?;
    let preview = ctx.preview(params.index)?;
    let outcome = preview.outcome;
    let (artifact, error) = match outcome.artifact {
        Ok(artifact) => (Some(artifact), None),
        Err(e) => (None, Some(e.message)),
    };
    Ok(Json(PreviewResponse {
        index: preview.index,
        total: preview.total,
        prev: preview.prev,
        next: preview.next,
        row_key: cell_to_json(&outcome.row_key),
        recipient: outcome.recipient,
        conditions: outcome.conditions,
        artifact,
        error,
    }))
}

/// POST /api/v1/workflows/{workflow_id}/actions/{name}/run
///
/// Run the action now through the configured transport.
pub async fn run(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, name)): Path<(DbId, String)>,
    Json(options): Json<RunOptions>,
) -> AppResult<Json<RunReport>> {
    let target = RunTarget {
        workflow_id: owned.id(),
        action: &name,
        scheduled_run_id: None,
    };
    let cancel = CancellationToken::new();
    let report = run_action(
        &state.pool,
        &state.event_bus,
        state.transport.as_ref(),
        target,
        &options,
        &cancel,
    )
    .await?;

    let failed = report
        .rows
        .iter()
        .filter(|r| matches!(r.status, RowStatus::RenderError { .. } | RowStatus::TransportError { .. }))
        .count();
    if failed > 0 {
        tracing::warn!(workflow_id = owned.id(), action = %name, failed, "Action run had failing rows");
    }
    Ok(Json(report))
}
