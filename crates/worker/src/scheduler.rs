//! Scheduled run executor.
//!
//! [`ScheduledRunner`] polls `scheduled_runs` for due entries, claims them
//! with `FOR UPDATE SKIP LOCKED` so several workers can share the table, and
//! runs each claimed action through [`ontask_events::run_action`]. A run
//! cancelled through the API while it is delivering is noticed by polling
//! its status and stops before the next row.

use std::sync::Arc;
use std::time::Duration;

use ontask_core::run::RunReport;
use ontask_core::scheduling::{resolve_options, ScheduledRunStatus};
use ontask_core::transport::ArtifactTransport;
use ontask_core::types::DbId;
use ontask_db::models::scheduled_run::ScheduledRun;
use ontask_db::repositories::{ActionRepo, ScheduledRunRepo};
use ontask_db::DbPool;
use ontask_events::{run_action, EventBus, RunTarget};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

// ---------------------------------------------------------------------------
// ScheduledRunner
// ---------------------------------------------------------------------------

pub struct ScheduledRunner {
    pool: DbPool,
    bus: Arc<EventBus>,
    transport: Arc<dyn ArtifactTransport>,
    config: WorkerConfig,
}

impl ScheduledRunner {
    pub fn new(
        pool: DbPool,
        bus: Arc<EventBus>,
        transport: Arc<dyn ArtifactTransport>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pool,
            bus,
            transport,
            config,
        }
    }

    /// Poll until `shutdown` is cancelled. A run in progress at shutdown is
    /// stopped before its next row and recorded as failed.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduled runner cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.process_due(&shutdown).await {
                        tracing::error!(error = %e, "Failed to process due scheduled runs");
                    }
                }
            }
        }
    }

    /// Claim and execute every run due now. Returns how many were claimed.
    pub async fn process_due(&self, shutdown: &CancellationToken) -> Result<usize, sqlx::Error> {
        let claimed =
            ScheduledRunRepo::claim_due(&self.pool, chrono::Utc::now(), self.config.batch_size).await?;

        for run in &claimed {
            if shutdown.is_cancelled() {
                // Pending cannot return to scheduled.
                ScheduledRunRepo::fail(&self.pool, run.id, "Worker shut down before the run started", None)
                    .await?;
                continue;
            }
            if let Err(e) = self.execute(run, shutdown).await {
                tracing::error!(scheduled_run_id = run.id, error = %e, "Scheduled run bookkeeping failed");
            }
        }

        if !claimed.is_empty() {
            tracing::info!(count = claimed.len(), "Processed due scheduled runs");
        }
        Ok(claimed.len())
    }

    async fn execute(&self, run: &ScheduledRun, shutdown: &CancellationToken) -> Result<(), sqlx::Error> {
        if !ScheduledRunRepo::mark_running(&self.pool, run.id).await? {
            tracing::info!(scheduled_run_id = run.id, "Scheduled run left pending before it started");
            return Ok(());
        }

        let Some(action) = ActionRepo::find_by_id(&self.pool, run.action_id).await? else {
            ScheduledRunRepo::fail(&self.pool, run.id, "The action no longer exists", None).await?;
            return Ok(());
        };

        let options = resolve_options(&run.options(), self.config.abort_on_first_failure);
        let cancel = shutdown.child_token();
        let watcher = tokio::spawn(watch_cancellation(
            self.pool.clone(),
            run.id,
            self.config.cancel_check_interval,
            cancel.clone(),
        ));

        tracing::info!(
            scheduled_run_id = run.id,
            workflow_id = run.workflow_id,
            action = %action.name,
            "Executing scheduled run"
        );
        let target = RunTarget {
            workflow_id: run.workflow_id,
            action: &action.name,
            scheduled_run_id: Some(run.id),
        };
        let result = run_action(
            &self.pool,
            &self.bus,
            self.transport.as_ref(),
            target,
            &options,
            &cancel,
        )
        .await;

        cancel.cancel();
        let _ = watcher.await;

        let finished = match result {
            Ok(report) => self.finish(run.id, &report).await?,
            Err(e) => {
                tracing::warn!(scheduled_run_id = run.id, error = %e, "Scheduled run failed");
                ScheduledRunRepo::fail(&self.pool, run.id, &e.to_string(), None).await?
            }
        };
        if !finished {
            tracing::info!(scheduled_run_id = run.id, "Scheduled run was cancelled while running");
        }
        Ok(())
    }

    /// Store the summary; returns false when the entry is no longer running.
    async fn finish(&self, id: DbId, report: &RunReport) -> Result<bool, sqlx::Error> {
        let summary = serde_json::to_value(&report.summary).unwrap_or_default();
        let s = &report.summary;

        if let Some(row) = s.aborted_at {
            let message = format!("Aborted at row {row} after a failure");
            return ScheduledRunRepo::fail(&self.pool, id, &message, Some(&summary)).await;
        }
        if let Some(row) = s.cancelled_at {
            let message = format!("Stopped at row {row}");
            return ScheduledRunRepo::fail(&self.pool, id, &message, Some(&summary)).await;
        }

        tracing::info!(
            scheduled_run_id = id,
            delivered = s.delivered,
            render_errors = s.render_errors,
            transport_errors = s.transport_errors,
            "Scheduled run completed"
        );
        ScheduledRunRepo::complete(&self.pool, id, &summary).await
    }
}

/// Cancel `cancel` once the run's status becomes cancelled. Returns when
/// `cancel` fires for any reason.
async fn watch_cancellation(pool: DbPool, id: DbId, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match ScheduledRunRepo::status_of(&pool, id).await {
                    Ok(Some(status)) if status == ScheduledRunStatus::Cancelled.id() => {
                        tracing::info!(scheduled_run_id = id, "Cancellation requested, stopping run");
                        cancel.cancel();
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(scheduled_run_id = id, error = %e, "Could not check run status");
                    }
                }
            }
        }
    }
}
