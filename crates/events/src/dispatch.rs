//! Running an action end to end.
//!
//! Used by the API (immediate runs) and the worker (scheduled runs). The
//! workflow snapshot is loaded without the writer lock, artifacts are
//! delivered, and only the run's findings are written back under the lock.

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use ontask_core::run::{execute_run, RunOptions, RunReport};
use ontask_core::transport::ArtifactTransport;
use ontask_core::types::DbId;
use ontask_db::store::{StoreError, WorkflowStore};

use crate::bus::{EventBus, RunEvent};

/// The action to run and, for scheduled runs, the schedule entry behind it.
#[derive(Debug, Clone, Copy)]
pub struct RunTarget<'a> {
    pub workflow_id: DbId,
    pub action: &'a str,
    pub scheduled_run_id: Option<DbId>,
}

/// Run the target action, record what the run learned and publish its
/// events.
pub async fn run_action(
    pool: &PgPool,
    bus: &EventBus,
    transport: &dyn ArtifactTransport,
    target: RunTarget<'_>,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<RunReport, StoreError> {
    let RunTarget {
        workflow_id,
        action,
        scheduled_run_id,
    } = target;
    let workflow = WorkflowStore::load(pool, workflow_id).await?;
    let action_id = workflow.action(action)?.id;
    let ctx = workflow.run_context(action, chrono::Utc::now())?;
    let report = execute_run(&ctx, options, transport, cancel).await?;

    let recorded = WorkflowStore::mutate(pool, workflow_id, |wf| {
        wf.record_run(action, &report.summary)
    })
    .await;
    if let Err(e) = recorded {
        // The action may have been renamed or deleted while the run was
        // delivering; the report is still published.
        tracing::warn!(workflow_id, action, error = %e, "Could not record run result");
    }

    bus.publish_all(RunEvent::from_report(
        workflow_id,
        action_id,
        scheduled_run_id,
        &report,
    ));
    tracing::info!(
        workflow_id,
        action,
        delivered = report.summary.delivered,
        total = report.summary.total_rows,
        "Action run finished"
    );
    Ok(report)
}
