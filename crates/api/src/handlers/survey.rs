//! Survey and to-do forms: the learner-facing side of form actions.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use ontask_core::survey::render_html;
use ontask_core::types::DbId;
use ontask_db::store::WorkflowStore;
use serde::{Deserialize, Serialize};

use super::primary_key_value;
use crate::error::AppResult;
use crate::middleware::auth::OwnedWorkflow;
use crate::query::SurveyParams;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitSurvey {
    /// Value of the workflow's key column identifying the learner.
    pub key_value: String,
    /// Submitted field values by column name.
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResult {
    pub updated_columns: Vec<String>,
}

/// GET /api/v1/workflows/{workflow_id}/actions/{name}/survey?key_value=
///
/// The form as JSON, or as HTML with `format=html`.
pub async fn form(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, action)): Path<(DbId, String)>,
    Query(params): Query<SurveyParams>,
) -> AppResult<Response> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    let key = primary_key_value(&workflow, &params.key_value)?;
    let form = workflow.survey_form(&action, &key, chrono::Utc::now())?;
    Ok(match params.format.as_deref() {
        Some("html") => Html(render_html(&form)).into_response(),
        _ => Json(form).into_response(),
    })
}

/// POST /api/v1/workflows/{workflow_id}/actions/{name}/survey
pub async fn submit(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Path((_, action)): Path<(DbId, String)>,
    Json(input): Json<SubmitSurvey>,
) -> AppResult<Json<SubmitResult>> {
    let updated_columns = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let key = primary_key_value(wf, &input.key_value)?;
        wf.submit_survey(&action, &key, &input.fields, chrono::Utc::now())
    })
    .await?;
    tracing::info!(
        workflow_id = owned.id(),
        action = %action,
        columns = updated_columns.len(),
        "Survey submitted"
    );
    Ok(Json(SubmitResult { updated_columns }))
}
