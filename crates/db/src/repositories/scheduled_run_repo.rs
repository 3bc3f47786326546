//! Repository for the `scheduled_runs` table (C8).
//!
//! Status changes go through [`ScheduledRunStatus`]; every transition is
//! guarded in SQL by the statuses it may start from.

use sqlx::PgPool;
use ontask_core::scheduling::{state_machine, ScheduledRunStatus};
use ontask_core::types::{DbId, Timestamp};

use crate::models::scheduled_run::{CreateScheduledRun, ScheduledRun};

/// Column list for `scheduled_runs` queries.
const COLUMNS: &str = "\
    id, workflow_id, action_id, status_id, scheduled_at, payload, summary, \
    error_message, created_by, claimed_at, started_at, completed_at, \
    created_at, updated_at";

/// Statuses a run may be cancelled from.
fn cancellable_statuses() -> Vec<i16> {
    [ScheduledRunStatus::Scheduled, ScheduledRunStatus::Pending, ScheduledRunStatus::Running]
        .into_iter()
        .filter(|s| state_machine::can_transition(s.id(), ScheduledRunStatus::Cancelled.id()))
        .map(ScheduledRunStatus::id)
        .collect()
}

pub struct ScheduledRunRepo;

impl ScheduledRunRepo {
    /// Schedule a run. A run already scheduled for the same action and
    /// instant is returned unchanged.
    pub async fn create(
        pool: &PgPool,
        workflow_id: DbId,
        action_id: DbId,
        created_by: DbId,
        input: &CreateScheduledRun,
    ) -> Result<ScheduledRun, sqlx::Error> {
        let payload = serde_json::to_value(&input.payload)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let query = format!(
            "INSERT INTO scheduled_runs (workflow_id, action_id, status_id, scheduled_at, payload, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (action_id, scheduled_at) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, ScheduledRun>(&query)
            .bind(workflow_id)
            .bind(action_id)
            .bind(ScheduledRunStatus::Scheduled.id())
            .bind(input.scheduled_at)
            .bind(payload)
            .bind(created_by)
            .fetch_optional(pool)
            .await?;
        if let Some(run) = inserted {
            return Ok(run);
        }

        let query = format!(
            "SELECT {COLUMNS} FROM scheduled_runs WHERE action_id = $1 AND scheduled_at = $2"
        );
        sqlx::query_as::<_, ScheduledRun>(&query)
            .bind(action_id)
            .bind(input.scheduled_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ScheduledRun>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM scheduled_runs WHERE id = $1");
        sqlx::query_as::<_, ScheduledRun>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_for_workflow(pool: &PgPool, workflow_id: DbId) -> Result<Vec<ScheduledRun>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM scheduled_runs WHERE workflow_id = $1 ORDER BY scheduled_at DESC, id DESC"
        );
        sqlx::query_as::<_, ScheduledRun>(&query)
            .bind(workflow_id)
            .fetch_all(pool)
            .await
    }

    /// Atomically move up to `limit` due runs to pending.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent workers never claim the
    /// same run.
    pub async fn claim_due(pool: &PgPool, now: Timestamp, limit: i64) -> Result<Vec<ScheduledRun>, sqlx::Error> {
        let query = format!(
            "UPDATE scheduled_runs \
             SET status_id = $1, claimed_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM scheduled_runs \
                 WHERE status_id = $2 AND scheduled_at <= $3 \
                 ORDER BY scheduled_at ASC, id ASC \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScheduledRun>(&query)
            .bind(ScheduledRunStatus::Pending.id())
            .bind(ScheduledRunStatus::Scheduled.id())
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Pending -> running. Returns false if the run left pending meanwhile.
    pub async fn mark_running(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scheduled_runs SET status_id = $2, started_at = NOW() WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(ScheduledRunStatus::Running.id())
        .bind(ScheduledRunStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Running -> completed with the run summary.
    pub async fn complete(pool: &PgPool, id: DbId, summary: &serde_json::Value) -> Result<bool, sqlx::Error> {
        Self::finish(pool, id, ScheduledRunStatus::Completed, Some(summary), None).await
    }

    /// Pending or running -> failed.
    pub async fn fail(
        pool: &PgPool,
        id: DbId,
        error_message: &str,
        summary: Option<&serde_json::Value>,
    ) -> Result<bool, sqlx::Error> {
        Self::finish(pool, id, ScheduledRunStatus::Failed, summary, Some(error_message)).await
    }

    /// Cancel a run that has not finished yet.
    pub async fn cancel(pool: &PgPool, id: DbId) -> Result<Option<ScheduledRun>, sqlx::Error> {
        let query = format!(
            "UPDATE scheduled_runs \
             SET status_id = $2, completed_at = NOW() \
             WHERE id = $1 AND status_id = ANY($3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScheduledRun>(&query)
            .bind(id)
            .bind(ScheduledRunStatus::Cancelled.id())
            .bind(cancellable_statuses())
            .fetch_optional(pool)
            .await
    }

    /// Current status id, used by workers to notice cancellation.
    pub async fn status_of(pool: &PgPool, id: DbId) -> Result<Option<i16>, sqlx::Error> {
        let row: Option<(i16,)> = sqlx::query_as("SELECT status_id FROM scheduled_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|(status,)| status))
    }

    async fn finish(
        pool: &PgPool,
        id: DbId,
        to: ScheduledRunStatus,
        summary: Option<&serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let from: Vec<i16> = [ScheduledRunStatus::Pending, ScheduledRunStatus::Running]
            .into_iter()
            .map(ScheduledRunStatus::id)
            .filter(|&from| state_machine::can_transition(from, to.id()))
            .collect();
        let result = sqlx::query(
            "UPDATE scheduled_runs \
             SET status_id = $2, summary = $3, error_message = $4, completed_at = NOW() \
             WHERE id = $1 AND status_id = ANY($5)",
        )
        .bind(id)
        .bind(to.id())
        .bind(summary.cloned())
        .bind(error_message)
        .bind(from)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
