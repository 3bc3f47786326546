//! Repository for the `workflow_columns` table.

use sqlx::{PgConnection, PgExecutor};
use ontask_core::column::Column;
use ontask_core::types::DbId;

use crate::models::column::{categories_json, ColumnRow};

/// Column list for `workflow_columns` queries.
const COLUMNS: &str = "\
    id, workflow_id, name, description_text, data_type, is_key, position, \
    categories, active_from, active_to";

pub struct ColumnRepo;

impl ColumnRepo {
    /// Columns of a workflow in position order.
    pub async fn list(db: impl PgExecutor<'_>, workflow_id: DbId) -> Result<Vec<ColumnRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_columns WHERE workflow_id = $1 ORDER BY position"
        );
        sqlx::query_as::<_, ColumnRow>(&query)
            .bind(workflow_id)
            .fetch_all(db)
            .await
    }

    /// Replace the column metadata of a workflow within an existing transaction.
    pub async fn replace_all(
        conn: &mut PgConnection,
        workflow_id: DbId,
        columns: &[Column],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM workflow_columns WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *conn)
            .await?;

        for column in columns {
            sqlx::query(
                "INSERT INTO workflow_columns \
                    (workflow_id, name, description_text, data_type, is_key, position, \
                     categories, active_from, active_to) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(workflow_id)
            .bind(&column.name)
            .bind(&column.description_text)
            .bind(column.data_type.as_str())
            .bind(column.is_key)
            .bind(column.position)
            .bind(categories_json(column))
            .bind(column.active_from)
            .bind(column.active_to)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }
}
