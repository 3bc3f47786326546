//! Durable run log persistence.
//!
//! [`RunLogPersistence`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! and writes every [`RunEvent`] to `run_logs`. It runs as a long-lived
//! background task and stops when the bus is dropped.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use ontask_db::models::run_log::{CreateRunLog, RunLog};
use ontask_db::repositories::RunLogRepo;
use ontask_db::DbPool;

use crate::bus::{EventBus, RunEvent};

pub struct RunLogPersistence;

/// A spawned [`RunLogPersistence`] task.
pub struct PersistenceTask(JoinHandle<()>);

impl PersistenceTask {
    /// Wait for the task to drain after every [`EventBus`] handle has been
    /// dropped. Returns false when `limit` elapses first.
    pub async fn finish(self, limit: Duration) -> bool {
        match tokio::time::timeout(limit, self.0).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(limit_secs = limit.as_secs(), "Run log persistence did not drain in time");
                false
            }
        }
    }
}

impl RunLogPersistence {
    /// Subscribe to `bus` and persist its events on a background task.
    pub fn spawn(pool: DbPool, bus: &EventBus) -> PersistenceTask {
        PersistenceTask(tokio::spawn(Self::run(pool, bus.subscribe())))
    }

    pub async fn run(pool: DbPool, mut receiver: broadcast::Receiver<RunEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = Self::persist(&pool, &event).await {
                        tracing::error!(
                            error = %e,
                            event = event.event,
                            workflow_id = event.workflow_id,
                            "Failed to persist run event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Run log persistence lagged, some events were not persisted");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, run log persistence shutting down");
                    break;
                }
            }
        }
    }

    pub async fn persist(pool: &DbPool, event: &RunEvent) -> Result<RunLog, sqlx::Error> {
        RunLogRepo::insert(
            pool,
            &CreateRunLog {
                workflow_id: event.workflow_id,
                action_id: event.action_id,
                scheduled_run_id: event.scheduled_run_id,
                action_name: event.action_name.clone(),
                event: event.event,
                summary: event.summary.clone(),
                rows: event.rows.clone(),
            },
        )
        .await
    }
}
