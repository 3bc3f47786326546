use serde::Serialize;
use sqlx::FromRow;
use ontask_core::types::{DbId, Timestamp};

/// A row from the `actions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ActionRow {
    pub id: DbId,
    pub workflow_id: DbId,
    pub name: String,
    pub description_text: String,
    pub action_type: String,
    pub text_content: String,
    pub target_url: Option<String>,
    pub rows_all_false: Option<bool>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `conditions` table. `formula` holds the wire form.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConditionRow {
    pub id: DbId,
    pub action_id: DbId,
    pub name: String,
    pub description_text: String,
    pub formula: serde_json::Value,
    pub is_filter: bool,
    pub n_rows_selected: Option<i32>,
    pub position: i32,
}

/// A row from the `action_column_condition_tuples` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TupleRow {
    pub id: DbId,
    pub action_id: DbId,
    pub column_name: String,
    pub condition_name: Option<String>,
    pub changes_allowed: bool,
    pub position: i32,
}

/// A row from the `rubric_cells` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RubricCellRow {
    pub id: DbId,
    pub action_id: DbId,
    pub column_name: String,
    pub loa_position: i32,
    pub description_text: String,
    pub feedback_text: String,
}
