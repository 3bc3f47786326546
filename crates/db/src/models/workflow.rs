use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;
use ontask_core::types::{DbId, Timestamp};

/// A row from the `workflows` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkflowRow {
    pub id: DbId,
    pub owner_id: DbId,
    pub name: String,
    pub description_text: String,
    pub attributes: serde_json::Value,
    pub time_zone: String,
    pub nrows: i32,
    pub ncols: i32,
    #[serde(skip)]
    pub query_builder_ops: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a workflow.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateWorkflow {
    #[validate(length(min = 1, max = 512))]
    pub name: String,
    #[serde(default)]
    pub description_text: String,
    /// Fixed UTC offset such as `+10:00`; defaults to the server zone.
    pub time_zone: Option<String>,
}

/// DTO for updating a workflow. All fields optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateWorkflow {
    #[validate(length(min = 1, max = 512))]
    pub name: Option<String>,
    pub description_text: Option<String>,
    pub time_zone: Option<String>,
}
