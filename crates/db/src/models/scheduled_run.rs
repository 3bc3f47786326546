//! Scheduled action runs (C8).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ontask_core::run::RunOptions;
use ontask_core::scheduling::ScheduledRunStatus;
use ontask_core::types::{DbId, Timestamp};

/// A row from the `scheduled_runs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScheduledRun {
    pub id: DbId,
    pub workflow_id: DbId,
    pub action_id: DbId,
    pub status_id: i16,
    pub scheduled_at: Timestamp,
    pub payload: serde_json::Value,
    pub summary: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_by: DbId,
    pub claimed_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ScheduledRun {
    pub fn status(&self) -> Option<ScheduledRunStatus> {
        ScheduledRunStatus::from_id(self.status_id)
    }

    /// The stored payload; a malformed payload reads as the defaults.
    pub fn options(&self) -> RunOptions {
        serde_json::from_value(self.payload.clone()).unwrap_or_else(|e| {
            tracing::warn!(scheduled_run_id = self.id, error = %e, "Malformed run payload, using defaults");
            RunOptions::default()
        })
    }
}

/// DTO for scheduling a run.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateScheduledRun {
    pub scheduled_at: Timestamp,
    #[serde(default)]
    pub payload: RunOptions,
}
