//! Handlers for a workflow's data table: upload, merge, query, row edits and
//! CSV export.
//!
//! Queries are answered by the database: the filter compiles to SQL and the
//! table is never loaded into memory.

use std::collections::BTreeSet;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use ontask_core::column::Column;
use ontask_core::error::CoreError;
use ontask_core::export::frame_to_csv;
use ontask_core::formula::{FormulaEvaluator, PredicateBuilder};
use ontask_core::frame::{FrameColumn, Record, TypedFrame};
use ontask_core::merge::MergeSpec;
use ontask_core::types::{parse_time_zone, TimeZone};
use ontask_core::value::{Cell, DataType, Value};
use ontask_core::workflow::MergeReport;
use ontask_db::repositories::frame_repo::FrameQuery;
use ontask_db::repositories::{ColumnRepo, FrameRepo};
use ontask_db::store::WorkflowStore;
use serde::{Deserialize, Serialize};

use super::{key_value, parse_formula, FrameResponse};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::OwnedWorkflow;
use crate::query::RowKeyParams;
use crate::response::CsvDownload;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadTable {
    pub records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
pub struct MergeTable {
    pub records: Vec<Record>,
    pub spec: MergeSpec,
}

#[derive(Debug, Serialize)]
pub struct TableShape {
    pub nrows: usize,
    pub ncols: usize,
    pub columns: Vec<Column>,
}

#[derive(Debug, Deserialize)]
pub struct TableQuery {
    /// Projection; every column when absent.
    pub columns: Option<Vec<String>>,
    pub filter: Option<serde_json::Value>,
    /// Case-insensitive substring search.
    pub search: Option<String>,
    /// Columns searched; the projection when empty.
    #[serde(default)]
    pub search_columns: Vec<String>,
    pub order_by: Option<String>,
    #[serde(default = "ascending")]
    pub ascending: bool,
}

fn ascending() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct TableQueryResult {
    #[serde(flatten)]
    pub frame: FrameResponse,
    /// Rows passing the filter, before the search.
    pub filtered: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRow {
    pub updates: serde_json::Map<String, serde_json::Value>,
}

/// PUT /api/v1/workflows/{workflow_id}/table
///
/// Replace the table with JSON records, typed by inference.
pub async fn upload(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Json(input): Json<UploadTable>,
) -> AppResult<Json<TableShape>> {
    let shape = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        wf.store_records(&input.records)?;
        Ok(TableShape {
            nrows: wf.nrows(),
            ncols: wf.ncols(),
            columns: wf.columns().to_vec(),
        })
    })
    .await?;
    tracing::info!(workflow_id = owned.id(), nrows = shape.nrows, "Table uploaded");
    Ok(Json(shape))
}

/// POST /api/v1/workflows/{workflow_id}/table/merge
pub async fn merge(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Json(input): Json<MergeTable>,
) -> AppResult<Json<MergeReport>> {
    let report = WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let source = TypedFrame::from_records(&input.records, &wf.time_zone)?;
        wf.merge(source, &input.spec, None)
    })
    .await?;
    Ok(Json(report))
}

/// POST /api/v1/workflows/{workflow_id}/table/query
pub async fn query(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Json(input): Json<TableQuery>,
) -> AppResult<Json<TableQueryResult>> {
    let tz = parse_time_zone(&owned.workflow.time_zone)
        .ok_or_else(|| AppError::InternalError(format!("Workflow {} has an invalid time zone", owned.id())))?;
    let mut conn = state.pool.acquire().await?;

    let columns = ColumnRepo::list(&mut *conn, owned.id())
        .await?
        .into_iter()
        .map(|row| row.into_column(&tz))
        .collect::<Result<Vec<_>, _>>()?;
    let typing = |name: &str| columns.iter().find(|c| c.name == name).map(|c| c.data_type);

    let projection = projection(&columns, input.columns.as_deref())?;
    let search_columns: Vec<FrameColumn> = match &input.search {
        Some(_) if input.search_columns.is_empty() => projection.clone(),
        _ => input
            .search_columns
            .iter()
            .map(|name| {
                typing(name)
                    .map(|data_type| FrameColumn::new(name.clone(), data_type))
                    .ok_or_else(|| CoreError::UnknownColumn(name.clone()))
            })
            .collect::<Result<_, _>>()?,
    };
    if let Some(name) = &input.order_by {
        typing(name).ok_or_else(|| CoreError::UnknownColumn(name.clone()))?;
    }

    let filter = input
        .filter
        .as_ref()
        .map(|json| {
            let formula = parse_formula(json, &tz)?;
            PredicateBuilder::new(&typing).evaluate(&formula)
        })
        .transpose()?;

    let query = FrameQuery {
        filter: filter.as_ref(),
        search: input.search.as_deref().map(|text| (text, search_columns.as_slice())),
        order_by: input.order_by.as_deref().map(|column| (column, input.ascending)),
    };
    let frame = FrameRepo::select(&mut conn, owned.id(), &projection, &query, &tz).await?;
    let filtered = FrameRepo::count(&mut conn, owned.id(), filter.as_ref()).await?;

    Ok(Json(TableQueryResult {
        frame: FrameResponse::from(&frame),
        filtered,
    }))
}

fn projection(columns: &[Column], names: Option<&[String]>) -> Result<Vec<FrameColumn>, CoreError> {
    let Some(names) = names else {
        return Ok(columns.iter().map(Column::frame_column).collect());
    };
    let mut seen = BTreeSet::new();
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .map(|name| {
            columns
                .iter()
                .find(|c| &c.name == name)
                .map(Column::frame_column)
                .ok_or_else(|| CoreError::UnknownColumn(name.clone()))
        })
        .collect()
}

fn json_updates(
    updates: &serde_json::Map<String, serde_json::Value>,
    typing: impl Fn(&str) -> Result<DataType, CoreError>,
    tz: &TimeZone,
) -> Result<Vec<(String, Cell)>, CoreError> {
    updates
        .iter()
        .map(|(name, json)| {
            let cell = Value::from_json(json, typing(name)?, tz)?;
            Ok((name.clone(), cell))
        })
        .collect()
}

/// PUT /api/v1/workflows/{workflow_id}/table/rows?key=&value=
pub async fn update_row(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Query(params): Query<RowKeyParams>,
    Json(input): Json<UpdateRow>,
) -> AppResult<StatusCode> {
    WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let value = key_value(wf, &params.key, &params.value)?;
        let tz = wf.time_zone;
        let updates = json_updates(&input.updates, |name| Ok(wf.column(name)?.data_type), &tz)?;
        wf.update_row(&params.key, &value, &updates)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/workflows/{workflow_id}/table/rows?key=&value=
pub async fn delete_row(
    State(state): State<AppState>,
    owned: OwnedWorkflow,
    Query(params): Query<RowKeyParams>,
) -> AppResult<StatusCode> {
    WorkflowStore::mutate(&state.pool, owned.id(), |wf| {
        let value = key_value(wf, &params.key, &params.value)?;
        wf.delete_row(&params.key, &value)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/workflows/{workflow_id}/table/csv
pub async fn export_csv(State(state): State<AppState>, owned: OwnedWorkflow) -> AppResult<CsvDownload> {
    let workflow = WorkflowStore::load(&state.pool, owned.id()).await?;
    Ok(CsvDownload(frame_to_csv(workflow.frame(), &workflow.time_zone)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("sid", DataType::Integer, 1),
            Column::new("name", DataType::String, 2),
        ]
    }

    #[test]
    fn projection_defaults_to_every_column() {
        let all = projection(&columns(), None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn projection_rejects_unknown_and_drops_repeats() {
        let names = vec!["name".to_string(), "name".to_string()];
        assert_eq!(projection(&columns(), Some(&names)).unwrap().len(), 1);
        let ghost = vec!["ghost".to_string()];
        assert!(matches!(
            projection(&columns(), Some(&ghost)),
            Err(CoreError::UnknownColumn(_))
        ));
    }
}
