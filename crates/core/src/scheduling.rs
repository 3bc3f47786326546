//! Scheduled action runs: status state machine and payload.
//!
//! Status IDs match the `scheduled_run_statuses` seed data.

use serde::{Deserialize, Serialize};

use crate::run::RunOptions;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ScheduledRunStatus {
    Scheduled = 1,
    Pending = 2,
    Running = 3,
    Completed = 4,
    Failed = 5,
    Cancelled = 6,
}

impl ScheduledRunStatus {
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        use ScheduledRunStatus::*;
        [Scheduled, Pending, Running, Completed, Failed, Cancelled]
            .into_iter()
            .find(|s| s.id() == id)
    }

    pub fn is_terminal(self) -> bool {
        state_machine::valid_transitions(self.id()).is_empty()
    }
}

pub mod state_machine {
    /// Status IDs reachable from `from_status`. Terminal states (Completed=4,
    /// Failed=5, Cancelled=6) have none.
    pub fn valid_transitions(from_status: i16) -> &'static [i16] {
        match from_status {
            // Scheduled -> Pending, Cancelled
            1 => &[2, 6],
            // Pending -> Running, Cancelled
            2 => &[3, 6],
            // Running -> Completed, Failed, Cancelled
            3 => &[4, 5, 6],
            _ => &[],
        }
    }

    pub fn can_transition(from: i16, to: i16) -> bool {
        valid_transitions(from).contains(&to)
    }

    pub fn status_name(id: i16) -> &'static str {
        match id {
            1 => "Scheduled",
            2 => "Pending",
            3 => "Running",
            4 => "Completed",
            5 => "Failed",
            6 => "Cancelled",
            _ => "Unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Options for a scheduled run. The payload may only strengthen the
/// worker-wide abort setting.
pub fn resolve_options(payload: &RunOptions, default_abort: bool) -> RunOptions {
    RunOptions {
        abort_on_first_failure: payload.abort_on_first_failure || default_abort,
        ..payload.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::state_machine::*;
    use super::*;

    #[test]
    fn scheduled_to_pending() {
        assert!(can_transition(1, 2));
    }

    #[test]
    fn scheduled_to_cancelled() {
        assert!(can_transition(1, 6));
    }

    #[test]
    fn pending_to_running() {
        assert!(can_transition(2, 3));
    }

    #[test]
    fn running_to_each_terminal_state() {
        for to in [4, 5, 6] {
            assert!(can_transition(3, to));
        }
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for status in [
            ScheduledRunStatus::Completed,
            ScheduledRunStatus::Failed,
            ScheduledRunStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
        }
        assert!(!ScheduledRunStatus::Running.is_terminal());
    }

    #[test]
    fn scheduled_cannot_skip_to_running() {
        assert!(!can_transition(1, 3));
        assert!(!can_transition(4, 3));
    }

    #[test]
    fn unknown_status_has_no_transitions() {
        assert!(valid_transitions(99).is_empty());
        assert_eq!(status_name(99), "Unknown");
        assert_eq!(ScheduledRunStatus::from_id(99), None);
    }

    #[test]
    fn ids_round_trip() {
        assert_eq!(ScheduledRunStatus::from_id(3), Some(ScheduledRunStatus::Running));
        assert_eq!(ScheduledRunStatus::Cancelled.id(), 6);
    }

    #[test]
    fn payload_parses_with_defaults() {
        let payload: RunOptions =
            serde_json::from_value(serde_json::json!({"subject": "Week 3", "recipient_column": "email"})).unwrap();
        assert_eq!(payload.subject.as_deref(), Some("Week 3"));
        assert!(!payload.abort_on_first_failure);
        assert!(resolve_options(&payload, true).abort_on_first_failure);
        assert!(!resolve_options(&payload, false).abort_on_first_failure);
    }
}
