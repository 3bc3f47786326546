//! Loading and persisting whole workflow aggregates.
//!
//! Writers go through [`WorkflowStore::mutate`]: it opens a transaction,
//! takes `pg_advisory_xact_lock(workflow_id)`, loads the aggregate, applies
//! the mutation in memory, checks invariants and writes everything back
//! before committing. Readers load without locking.

use std::collections::HashMap;

use sqlx::{PgConnection, PgPool};
use ontask_core::action::{Action, ActionColumnConditionTuple, ActionType};
use ontask_core::cache::Cached;
use ontask_core::column::Column;
use ontask_core::condition::Condition;
use ontask_core::error::CoreError;
use ontask_core::formula::Formula;
use ontask_core::frame::FrameColumn;
use ontask_core::rubric::RubricCell;
use ontask_core::types::{parse_time_zone, DbId, TimeZone};
use ontask_core::view::View;
use ontask_core::workflow::Workflow;

use crate::models::action::{ActionRow, ConditionRow, RubricCellRow, TupleRow};
use crate::models::view::ViewRow;
use crate::models::workflow::WorkflowRow;
use crate::repositories::workflow_repo::attributes_from_json;
use crate::repositories::{ActionRepo, ColumnRepo, FrameRepo, ViewRepo, WorkflowRepo};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct WorkflowStore;

impl WorkflowStore {
    /// Insert a new workflow with everything it holds. Returns its id.
    pub async fn create(pool: &PgPool, workflow: &Workflow) -> Result<DbId, StoreError> {
        workflow.check_invariants()?;
        let mut tx = pool.begin().await?;
        let row = WorkflowRepo::insert(&mut tx, workflow).await?;
        WorkflowRepo::lock(&mut tx, row.id).await?;
        Self::persist_parts(&mut tx, row.id, workflow, true).await?;
        tx.commit().await?;
        tracing::info!(workflow_id = row.id, owner_id = workflow.owner_id, "Workflow created");
        Ok(row.id)
    }

    /// Read a workflow without taking the writer lock.
    pub async fn load(pool: &PgPool, id: DbId) -> Result<Workflow, StoreError> {
        let mut conn = pool.acquire().await?;
        Self::load_in(&mut conn, id).await
    }

    /// Apply `mutation` to the workflow under its advisory lock and persist
    /// the result. Nothing is written when the mutation fails.
    pub async fn mutate<T, F>(pool: &PgPool, id: DbId, mutation: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Workflow) -> Result<T, CoreError>,
    {
        let mut tx = pool.begin().await?;
        WorkflowRepo::lock(&mut tx, id).await?;
        let mut workflow = Self::load_in(&mut tx, id).await?;

        let output = mutation(&mut workflow)?;
        workflow.query_builder_ops();
        workflow.check_invariants()?;

        let frame_changed = workflow.frame_changed();
        Self::persist_parts(&mut tx, id, &workflow, frame_changed).await?;
        tx.commit().await?;
        workflow.mark_frame_persisted();

        tracing::debug!(workflow_id = id, frame_changed, "Workflow persisted");
        Ok(output)
    }

    /// Delete a workflow, its descendants and its backing table.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, StoreError> {
        let mut tx = pool.begin().await?;
        WorkflowRepo::lock(&mut tx, id).await?;
        let deleted = WorkflowRepo::delete(&mut tx, id).await?;
        if deleted {
            FrameRepo::drop_table(&mut tx, id).await?;
        }
        tx.commit().await?;
        if deleted {
            tracing::info!(workflow_id = id, "Workflow deleted");
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    async fn load_in(conn: &mut PgConnection, id: DbId) -> Result<Workflow, StoreError> {
        let row = WorkflowRepo::find_by_id(&mut *conn, id)
            .await?
            .ok_or(CoreError::NotFound { entity: "Workflow", id })?;
        let tz = stored_time_zone(&row)?;

        let columns = ColumnRepo::list(&mut *conn, id)
            .await?
            .into_iter()
            .map(|c| c.into_column(&tz))
            .collect::<Result<Vec<_>, _>>()?;
        let frame_columns: Vec<FrameColumn> = columns.iter().map(Column::frame_column).collect();
        let frame = FrameRepo::load(&mut *conn, id, &frame_columns, &tz).await?;

        let actions = assemble_actions(
            ActionRepo::list(&mut *conn, id).await?,
            ActionRepo::list_conditions(&mut *conn, id).await?,
            ActionRepo::list_tuples(&mut *conn, id).await?,
            ActionRepo::list_rubric_cells(&mut *conn, id).await?,
            &tz,
        )?;
        let views = ViewRepo::list(&mut *conn, id)
            .await?
            .into_iter()
            .map(|v| view_from_row(v, &tz))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Workflow::from_parts(
            row.id,
            row.owner_id,
            row.name,
            row.description_text,
            attributes_from_json(&row.attributes),
            tz,
            columns,
            frame,
            actions,
            views,
            row.query_builder_ops,
        ))
    }

    async fn persist_parts(
        conn: &mut PgConnection,
        id: DbId,
        workflow: &Workflow,
        write_frame: bool,
    ) -> Result<(), sqlx::Error> {
        WorkflowRepo::update(&mut *conn, id, workflow).await?;
        ColumnRepo::replace_all(&mut *conn, id, workflow.columns()).await?;
        if write_frame {
            FrameRepo::replace(&mut *conn, id, workflow.frame()).await?;
        }

        let kept: Vec<DbId> = workflow.actions().iter().filter_map(|a| a.id).collect();
        let removed = ActionRepo::delete_except(&mut *conn, id, &kept).await?;
        if removed > 0 {
            tracing::debug!(workflow_id = id, removed, "Actions deleted");
        }
        for action in workflow.actions() {
            let action_id = match action.id {
                Some(action_id) => {
                    ActionRepo::update(&mut *conn, action_id, action).await?;
                    action_id
                }
                None => ActionRepo::insert(&mut *conn, id, action).await?,
            };
            ActionRepo::replace_children(&mut *conn, action_id, action).await?;
        }

        ViewRepo::replace_all(&mut *conn, id, workflow.views()).await?;
        Ok(())
    }
}

fn stored_time_zone(row: &WorkflowRow) -> Result<TimeZone, CoreError> {
    parse_time_zone(&row.time_zone).ok_or_else(|| {
        CoreError::Internal(format!(
            "Workflow {} has an invalid time zone '{}'",
            row.id, row.time_zone
        ))
    })
}

fn assemble_actions(
    rows: Vec<ActionRow>,
    conditions: Vec<ConditionRow>,
    tuples: Vec<TupleRow>,
    cells: Vec<RubricCellRow>,
    tz: &TimeZone,
) -> Result<Vec<Action>, CoreError> {
    let mut conditions_by_action: HashMap<DbId, Vec<Condition>> = HashMap::new();
    for row in conditions {
        let formula = Formula::from_json_in(&row.formula, tz)?;
        conditions_by_action.entry(row.action_id).or_default().push(Condition {
            id: Some(row.id),
            name: row.name,
            description_text: row.description_text,
            formula,
            is_filter: row.is_filter,
            n_rows_selected: Cached::from_option(row.n_rows_selected.map(|n| n as usize)),
        });
    }

    let mut tuples_by_action: HashMap<DbId, Vec<ActionColumnConditionTuple>> = HashMap::new();
    for row in tuples {
        tuples_by_action.entry(row.action_id).or_default().push(ActionColumnConditionTuple {
            column: row.column_name,
            condition: row.condition_name,
            changes_allowed: row.changes_allowed,
        });
    }

    let mut cells_by_action: HashMap<DbId, Vec<RubricCell>> = HashMap::new();
    for row in cells {
        cells_by_action.entry(row.action_id).or_default().push(RubricCell {
            column: row.column_name,
            loa_position: row.loa_position.max(0) as usize,
            description_text: row.description_text,
            feedback_text: row.feedback_text,
        });
    }

    rows.into_iter()
        .map(|row| {
            let action_type: ActionType = row.action_type.parse()?;
            Ok(Action {
                id: Some(row.id),
                name: row.name,
                description_text: row.description_text,
                action_type,
                text_content: row.text_content,
                target_url: row.target_url,
                conditions: conditions_by_action.remove(&row.id).unwrap_or_default(),
                column_condition_tuples: tuples_by_action.remove(&row.id).unwrap_or_default(),
                rubric_cells: cells_by_action.remove(&row.id).unwrap_or_default(),
                rows_all_false: Cached::from_option(row.rows_all_false),
            })
        })
        .collect()
}

fn view_from_row(row: ViewRow, tz: &TimeZone) -> Result<View, CoreError> {
    let columns: Vec<String> = serde_json::from_value(row.columns).map_err(|e| {
        CoreError::Internal(format!("View '{}' has malformed columns: {e}", row.name))
    })?;
    let filter = row
        .filter
        .as_ref()
        .map(|f| Formula::from_json_in(f, tz))
        .transpose()?;
    Ok(View {
        id: Some(row.id),
        name: row.name,
        description_text: row.description_text,
        columns,
        filter,
        num_rows: Cached::from_option(row.num_rows.map(|n| n as usize)),
    })
}
