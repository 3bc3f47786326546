//! Repository for the `views` table.

use sqlx::{PgConnection, PgExecutor};
use ontask_core::types::DbId;
use ontask_core::view::View;

use crate::models::view::ViewRow;

/// Column list for `views` queries.
const COLUMNS: &str = "id, workflow_id, name, description_text, columns, filter, num_rows";

pub struct ViewRepo;

impl ViewRepo {
    pub async fn list(db: impl PgExecutor<'_>, workflow_id: DbId) -> Result<Vec<ViewRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM views WHERE workflow_id = $1 ORDER BY id");
        sqlx::query_as::<_, ViewRow>(&query)
            .bind(workflow_id)
            .fetch_all(db)
            .await
    }

    /// Replace the views of a workflow within an existing transaction.
    pub async fn replace_all(conn: &mut PgConnection, workflow_id: DbId, views: &[View]) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM views WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *conn)
            .await?;

        for view in views {
            let columns = serde_json::Value::Array(
                view.columns
                    .iter()
                    .map(|c| serde_json::Value::String(c.clone()))
                    .collect(),
            );
            sqlx::query(
                "INSERT INTO views (workflow_id, name, description_text, columns, filter, num_rows) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(workflow_id)
            .bind(&view.name)
            .bind(&view.description_text)
            .bind(columns)
            .bind(view.filter.as_ref().map(|f| f.to_json()))
            .bind(view.num_rows.value().map(|n| n as i32))
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }
}
