use serde::Serialize;
use sqlx::FromRow;
use ontask_core::types::{DbId, Timestamp};

/// Run log events.
pub const EVENT_RUN_COMPLETED: &str = "run_completed";
pub const EVENT_RUN_CANCELLED: &str = "run_cancelled";
pub const EVENT_RUN_ABORTED: &str = "run_aborted";
pub const EVENT_ROWS_ALL_FALSE: &str = "rows_all_false";

/// A row from the `run_logs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RunLog {
    pub id: DbId,
    pub workflow_id: DbId,
    pub action_id: Option<DbId>,
    pub scheduled_run_id: Option<DbId>,
    pub action_name: String,
    pub event: String,
    pub summary: serde_json::Value,
    pub rows: serde_json::Value,
    pub created_at: Timestamp,
}

/// Insert DTO for a run log entry.
#[derive(Debug, Clone)]
pub struct CreateRunLog {
    pub workflow_id: DbId,
    pub action_id: Option<DbId>,
    pub scheduled_run_id: Option<DbId>,
    pub action_name: String,
    pub event: &'static str,
    pub summary: serde_json::Value,
    pub rows: serde_json::Value,
}
