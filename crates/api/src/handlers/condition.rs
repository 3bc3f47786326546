//! Handlers for the conditions of an action.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use ontask_core::action::Action;
use ontask_core::condition::Condition;
use ontask_core::error::CoreError;
use ontask_core::types::DbId;
use ontask_db::store::WorkflowStore;
use serde::Deserialize;
use validator::Validate;

use super::parse_formula;
use crate::error::AppResult;
use crate::middleware::auth::OwnedWorkflow;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCondition {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[serde(default)]
    pub description_text: String,
    pub formula: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCondition {
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,
    pub description_text: Option<String>,
    pub formula: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CloneCondition {
    #[validate(length(min = 1, max = 256))]
    pub new_name: String,
    /// Action receiving the copy; the same action when absent.
    pub target_action: Option<String>,
}

/// POST /api/v1/workflows/{workflow_id}/actions/{name}/conditions
pub async fn create(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, action)): Path<(DbId, String)>,
    Json(input): Json<CreateCondition>,
) -> AppResult<(StatusCode, Json<Action>)> {
    input.validate()?;
    let action = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let formula = parse_formula(&input.formula, &wf.time_zone)?;
        let mut condition = Condition::new(input.name, formula);
        condition.description_text = input.description_text;
        wf.add_condition(&action, condition).cloned()
    })
    .await?;
    Ok((StatusCode::CREATED, Json(action)))
}

/// PUT /api/v1/workflows/{workflow_id}/actions/{name}/conditions/{condition}
///
/// A new name is applied after the formula, so a rename reaches every
/// template block and column guard using the condition.
pub async fn update(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, action, condition)): Path<(DbId, String, String)>,
    Json(input): Json<UpdateCondition>,
) -> AppResult<Json<Action>> {
    input.validate()?;
    let action = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let current = wf
            .action(&action)?
            .condition(&condition)
            .ok_or_else(|| CoreError::named_not_found("Condition", condition.as_str()))?;
        if current.is_filter {
            return Err(CoreError::Validation(
                "The filter is changed through the action's filter endpoint".into(),
            ));
        }
        let formula = match &input.formula {
            Some(json) => parse_formula(json, &wf.time_zone)?,
            None => current.formula.clone(),
        };
        wf.update_condition(&action, &condition, formula, input.description_text)?;
        match input.name {
            Some(new_name) if new_name != condition => wf.rename_condition(&action, &condition, &new_name).cloned(),
            _ => wf.action(&action).cloned(),
        }
    })
    .await?;
    Ok(Json(action))
}

/// DELETE /api/v1/workflows/{workflow_id}/actions/{name}/conditions/{condition}
pub async fn delete(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, action, condition)): Path<(DbId, String, String)>,
) -> AppResult<StatusCode> {
    WorkflowStore::mutate(&state.pool, owned.id(), |wf| wf.delete_condition(&action, &condition)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/workflows/{workflow_id}/actions/{name}/conditions/{condition}/clone
pub async fn clone(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, action, condition)): Path<(DbId, String, String)>,
    Json(input): Json<CloneCondition>,
) -> AppResult<(StatusCode, Json<Action>)> {
    input.validate()?;
    let target = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        wf.clone_condition(&action, &condition, &input.new_name, input.target_action.as_deref())
            .cloned()
    })
    .await?;
    Ok((StatusCode::CREATED, Json(target)))
}
