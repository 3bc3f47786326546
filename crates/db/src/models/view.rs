use serde::Serialize;
use sqlx::FromRow;
use ontask_core::types::DbId;

/// A row from the `views` table. `columns` is a JSON array of names and
/// `filter` the formula wire form.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ViewRow {
    pub id: DbId,
    pub workflow_id: DbId,
    pub name: String,
    pub description_text: String,
    pub columns: serde_json::Value,
    pub filter: Option<serde_json::Value>,
    pub num_rows: Option<i32>,
}
