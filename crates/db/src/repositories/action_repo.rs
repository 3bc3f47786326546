//! Repository for `actions` and their children: `conditions`,
//! `action_column_condition_tuples` and `rubric_cells`.

use sqlx::{PgConnection, PgExecutor};
use ontask_core::action::Action;
use ontask_core::types::DbId;

use crate::models::action::{ActionRow, ConditionRow, RubricCellRow, TupleRow};

/// Column list for `actions` queries.
const COLUMNS: &str = "\
    id, workflow_id, name, description_text, action_type, text_content, \
    target_url, rows_all_false, created_at, updated_at";

const CONDITION_COLUMNS: &str = "\
    c.id, c.action_id, c.name, c.description_text, c.formula, c.is_filter, \
    c.n_rows_selected, c.position";

const TUPLE_COLUMNS: &str = "\
    t.id, t.action_id, t.column_name, t.condition_name, t.changes_allowed, t.position";

const RUBRIC_COLUMNS: &str = "\
    r.id, r.action_id, r.column_name, r.loa_position, r.description_text, r.feedback_text";

pub struct ActionRepo;

impl ActionRepo {
    pub async fn find_by_id(db: impl PgExecutor<'_>, id: DbId) -> Result<Option<ActionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM actions WHERE id = $1");
        sqlx::query_as::<_, ActionRow>(&query)
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list(db: impl PgExecutor<'_>, workflow_id: DbId) -> Result<Vec<ActionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM actions WHERE workflow_id = $1 ORDER BY id");
        sqlx::query_as::<_, ActionRow>(&query)
            .bind(workflow_id)
            .fetch_all(db)
            .await
    }

    /// Conditions of every action of a workflow, in action then position order.
    pub async fn list_conditions(
        db: impl PgExecutor<'_>,
        workflow_id: DbId,
    ) -> Result<Vec<ConditionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {CONDITION_COLUMNS} FROM conditions c \
             JOIN actions a ON a.id = c.action_id \
             WHERE a.workflow_id = $1 \
             ORDER BY c.action_id, c.position"
        );
        sqlx::query_as::<_, ConditionRow>(&query)
            .bind(workflow_id)
            .fetch_all(db)
            .await
    }

    pub async fn list_tuples(db: impl PgExecutor<'_>, workflow_id: DbId) -> Result<Vec<TupleRow>, sqlx::Error> {
        let query = format!(
            "SELECT {TUPLE_COLUMNS} FROM action_column_condition_tuples t \
             JOIN actions a ON a.id = t.action_id \
             WHERE a.workflow_id = $1 \
             ORDER BY t.action_id, t.position"
        );
        sqlx::query_as::<_, TupleRow>(&query)
            .bind(workflow_id)
            .fetch_all(db)
            .await
    }

    pub async fn list_rubric_cells(
        db: impl PgExecutor<'_>,
        workflow_id: DbId,
    ) -> Result<Vec<RubricCellRow>, sqlx::Error> {
        let query = format!(
            "SELECT {RUBRIC_COLUMNS} FROM rubric_cells r \
             JOIN actions a ON a.id = r.action_id \
             WHERE a.workflow_id = $1 \
             ORDER BY r.action_id, r.column_name, r.loa_position"
        );
        sqlx::query_as::<_, RubricCellRow>(&query)
            .bind(workflow_id)
            .fetch_all(db)
            .await
    }

    /// Insert an action row and return its id. Children are written by
    /// [`ActionRepo::replace_children`].
    pub async fn insert(conn: &mut PgConnection, workflow_id: DbId, action: &Action) -> Result<DbId, sqlx::Error> {
        let (id,): (DbId,) = sqlx::query_as(
            "INSERT INTO actions \
                (workflow_id, name, description_text, action_type, text_content, target_url, rows_all_false) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id",
        )
        .bind(workflow_id)
        .bind(&action.name)
        .bind(&action.description_text)
        .bind(action.action_type.as_str())
        .bind(&action.text_content)
        .bind(&action.target_url)
        .bind(action.rows_all_false.value())
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    pub async fn update(conn: &mut PgConnection, id: DbId, action: &Action) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE actions SET \
                name = $2, description_text = $3, action_type = $4, text_content = $5, \
                target_url = $6, rows_all_false = $7 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&action.name)
        .bind(&action.description_text)
        .bind(action.action_type.as_str())
        .bind(&action.text_content)
        .bind(&action.target_url)
        .bind(action.rows_all_false.value())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Delete the actions of a workflow whose ids are not in `keep`.
    pub async fn delete_except(
        conn: &mut PgConnection,
        workflow_id: DbId,
        keep: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM actions WHERE workflow_id = $1 AND NOT (id = ANY($2))")
            .bind(workflow_id)
            .bind(keep)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Replace conditions, tuples and rubric cells of one action within an
    /// existing transaction.
    pub async fn replace_children(
        conn: &mut PgConnection,
        action_id: DbId,
        action: &Action,
    ) -> Result<(), sqlx::Error> {
        for table in ["conditions", "action_column_condition_tuples", "rubric_cells"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE action_id = $1"))
                .bind(action_id)
                .execute(&mut *conn)
                .await?;
        }

        for (position, condition) in action.conditions.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conditions \
                    (action_id, name, description_text, formula, is_filter, n_rows_selected, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(action_id)
            .bind(&condition.name)
            .bind(&condition.description_text)
            .bind(condition.formula.to_json())
            .bind(condition.is_filter)
            .bind(condition.n_rows_selected.value().map(|n| n as i32))
            .bind(position as i32)
            .execute(&mut *conn)
            .await?;
        }

        for (position, tuple) in action.column_condition_tuples.iter().enumerate() {
            sqlx::query(
                "INSERT INTO action_column_condition_tuples \
                    (action_id, column_name, condition_name, changes_allowed, position) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(action_id)
            .bind(&tuple.column)
            .bind(&tuple.condition)
            .bind(tuple.changes_allowed)
            .bind(position as i32)
            .execute(&mut *conn)
            .await?;
        }

        for cell in &action.rubric_cells {
            sqlx::query(
                "INSERT INTO rubric_cells \
                    (action_id, column_name, loa_position, description_text, feedback_text) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(action_id)
            .bind(&cell.column)
            .bind(cell.loa_position as i32)
            .bind(&cell.description_text)
            .bind(&cell.feedback_text)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }
}
