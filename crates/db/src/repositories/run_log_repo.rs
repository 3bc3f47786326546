//! Repository for the append-only `run_logs` table.

use sqlx::{PgExecutor, PgPool};
use ontask_core::types::DbId;

use crate::models::run_log::{CreateRunLog, RunLog};

/// Column list for `run_logs` queries.
const COLUMNS: &str = "\
    id, workflow_id, action_id, scheduled_run_id, action_name, event, summary, rows, created_at";

/// Maximum page size for log listing.
const MAX_LIMIT: i64 = 100;

pub struct RunLogRepo;

impl RunLogRepo {
    pub async fn insert(db: impl PgExecutor<'_>, input: &CreateRunLog) -> Result<RunLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO run_logs (workflow_id, action_id, scheduled_run_id, action_name, event, summary, rows) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RunLog>(&query)
            .bind(input.workflow_id)
            .bind(input.action_id)
            .bind(input.scheduled_run_id)
            .bind(&input.action_name)
            .bind(input.event)
            .bind(&input.summary)
            .bind(&input.rows)
            .fetch_one(db)
            .await
    }

    /// Newest entries of a workflow, optionally for one action.
    pub async fn list(
        pool: &PgPool,
        workflow_id: DbId,
        action_id: Option<DbId>,
        limit: Option<i64>,
    ) -> Result<Vec<RunLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM run_logs \
             WHERE workflow_id = $1 AND ($2::BIGINT IS NULL OR action_id = $2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3"
        );
        sqlx::query_as::<_, RunLog>(&query)
            .bind(workflow_id)
            .bind(action_id)
            .bind(limit.unwrap_or(MAX_LIMIT).clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }
}
