//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>`; every finished action run is
//! published as one or more [`RunEvent`]s.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use ontask_core::run::RunReport;
use ontask_core::types::DbId;
use ontask_db::models::run_log::{
    EVENT_ROWS_ALL_FALSE, EVENT_RUN_ABORTED, EVENT_RUN_CANCELLED, EVENT_RUN_COMPLETED,
};

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// Something that happened while running an action.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    /// One of the `run_log` event names, e.g. `"run_completed"`.
    pub event: &'static str,
    pub workflow_id: DbId,
    pub action_id: Option<DbId>,
    pub scheduled_run_id: Option<DbId>,
    pub action_name: String,
    pub summary: serde_json::Value,
    /// Per-row outcomes; empty for derived events.
    pub rows: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    /// Events describing a finished run: its completion state and, when no
    /// selected row satisfied any condition, a `rows_all_false` event.
    pub fn from_report(
        workflow_id: DbId,
        action_id: Option<DbId>,
        scheduled_run_id: Option<DbId>,
        report: &RunReport,
    ) -> Vec<RunEvent> {
        let summary = &report.summary;
        let event = if summary.cancelled_at.is_some() {
            EVENT_RUN_CANCELLED
        } else if summary.aborted_at.is_some() {
            EVENT_RUN_ABORTED
        } else {
            EVENT_RUN_COMPLETED
        };
        let summary_json = serde_json::to_value(summary).unwrap_or_default();
        let base = RunEvent {
            event,
            workflow_id,
            action_id,
            scheduled_run_id,
            action_name: summary.action.clone(),
            summary: summary_json.clone(),
            rows: serde_json::to_value(&report.rows).unwrap_or_default(),
            timestamp: summary.finished_at,
        };

        let mut events = vec![base];
        if summary.rows_all_false == Some(true) {
            events.push(RunEvent {
                event: EVENT_ROWS_ALL_FALSE,
                workflow_id,
                action_id,
                scheduled_run_id,
                action_name: summary.action.clone(),
                summary: summary_json,
                rows: serde_json::Value::Array(Vec::new()),
                timestamp: summary.finished_at,
            });
        }
        events
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity. Slow receivers observe
    /// `RecvError::Lagged` once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Without subscribers the
    /// event is dropped.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = RunEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ontask_core::action::ActionType;
    use ontask_core::run::RunSummary;

    fn report(cancelled_at: Option<usize>, rows_all_false: Option<bool>) -> RunReport {
        let now = Utc::now();
        RunReport {
            summary: RunSummary {
                action: "feedback".into(),
                action_type: ActionType::PersonalizedText,
                total_rows: 2,
                delivered: 2,
                rendered: 0,
                excluded: 0,
                incorrect_json: 0,
                render_errors: 0,
                transport_errors: 0,
                cancelled_at,
                aborted_at: None,
                rows_all_false,
                started_at: now,
                finished_at: now,
            },
            rows: Vec::new(),
        }
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish_all(RunEvent::from_report(1, Some(2), None, &report(None, Some(false))));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event, EVENT_RUN_COMPLETED);
        assert_eq!(received.action_name, "feedback");
        assert_eq!(received.summary["delivered"], 2);
    }

    #[test]
    fn rows_all_false_adds_event() {
        let events = RunEvent::from_report(1, None, None, &report(None, Some(true)));
        let names: Vec<&str> = events.iter().map(|e| e.event).collect();
        assert_eq!(names, vec![EVENT_RUN_COMPLETED, EVENT_ROWS_ALL_FALSE]);
    }

    #[test]
    fn cancelled_run_is_reported_as_cancelled() {
        let events = RunEvent::from_report(1, None, None, &report(Some(1), None));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, EVENT_RUN_CANCELLED);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        EventBus::default().publish_all(RunEvent::from_report(1, None, None, &report(None, None)));
    }
}
