//! Integration tests for scheduled runs and run logs.

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use ontask_core::action::{Action, ActionType};
use ontask_core::run::RunOptions;
use ontask_core::scheduling::ScheduledRunStatus;
use ontask_core::types::DbId;
use ontask_core::workflow::Workflow;
use ontask_db::models::run_log::{CreateRunLog, EVENT_RUN_COMPLETED};
use ontask_db::models::scheduled_run::CreateScheduledRun;
use ontask_db::repositories::{RunLogRepo, ScheduledRunRepo};
use ontask_db::store::WorkflowStore;

async fn seed(pool: &PgPool) -> (DbId, DbId) {
    let mut wf = Workflow::new(1, "scheduled");
    wf.add_action(Action::new("notice", ActionType::PersonalizedText)).unwrap();
    let workflow_id = WorkflowStore::create(pool, &wf).await.unwrap();
    let action_id = WorkflowStore::load(pool, workflow_id)
        .await
        .unwrap()
        .action("notice")
        .unwrap()
        .id
        .unwrap();
    (workflow_id, action_id)
}

fn at(offset_minutes: i64) -> CreateScheduledRun {
    CreateScheduledRun {
        scheduled_at: Utc::now() + Duration::minutes(offset_minutes),
        payload: RunOptions {
            subject: Some("Week 3".into()),
            ..RunOptions::default()
        },
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_duplicate_schedule_returns_existing(pool: PgPool) {
    let (workflow_id, action_id) = seed(&pool).await;
    let input = at(-5);

    let first = ScheduledRunRepo::create(&pool, workflow_id, action_id, 1, &input).await.unwrap();
    let second = ScheduledRunRepo::create(&pool, workflow_id, action_id, 1, &input).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.status(), Some(ScheduledRunStatus::Scheduled));
    assert_eq!(first.options().subject.as_deref(), Some("Week 3"));
    assert_eq!(ScheduledRunRepo::list_for_workflow(&pool, workflow_id).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_claim_only_due_runs_once(pool: PgPool) {
    let (workflow_id, action_id) = seed(&pool).await;
    let due = ScheduledRunRepo::create(&pool, workflow_id, action_id, 1, &at(-5)).await.unwrap();
    ScheduledRunRepo::create(&pool, workflow_id, action_id, 1, &at(60)).await.unwrap();

    let claimed = ScheduledRunRepo::claim_due(&pool, Utc::now(), 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, due.id);
    assert_eq!(claimed[0].status(), Some(ScheduledRunStatus::Pending));
    assert!(ScheduledRunRepo::claim_due(&pool, Utc::now(), 10).await.unwrap().is_empty());

    assert!(ScheduledRunRepo::mark_running(&pool, due.id).await.unwrap());
    assert!(!ScheduledRunRepo::mark_running(&pool, due.id).await.unwrap());
    assert!(ScheduledRunRepo::complete(&pool, due.id, &json!({"delivered": 0})).await.unwrap());

    let done = ScheduledRunRepo::find_by_id(&pool, due.id).await.unwrap().unwrap();
    assert_eq!(done.status(), Some(ScheduledRunStatus::Completed));
    assert!(done.completed_at.is_some());
    assert!(ScheduledRunRepo::cancel(&pool, due.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_cancel_before_claim(pool: PgPool) {
    let (workflow_id, action_id) = seed(&pool).await;
    let run = ScheduledRunRepo::create(&pool, workflow_id, action_id, 1, &at(-1)).await.unwrap();

    let cancelled = ScheduledRunRepo::cancel(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status(), Some(ScheduledRunStatus::Cancelled));
    assert!(ScheduledRunRepo::claim_due(&pool, Utc::now(), 10).await.unwrap().is_empty());
    assert_eq!(
        ScheduledRunRepo::status_of(&pool, run.id).await.unwrap(),
        Some(ScheduledRunStatus::Cancelled.id())
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_run_logs_filter_by_action(pool: PgPool) {
    let (workflow_id, action_id) = seed(&pool).await;
    let entry = CreateRunLog {
        workflow_id,
        action_id: Some(action_id),
        scheduled_run_id: None,
        action_name: "notice".into(),
        event: EVENT_RUN_COMPLETED,
        summary: json!({"delivered": 3}),
        rows: json!([]),
    };
    RunLogRepo::insert(&pool, &entry).await.unwrap();
    RunLogRepo::insert(&pool, &CreateRunLog { action_id: None, ..entry.clone() })
        .await
        .unwrap();

    assert_eq!(RunLogRepo::list(&pool, workflow_id, None, None).await.unwrap().len(), 2);
    let for_action = RunLogRepo::list(&pool, workflow_id, Some(action_id), Some(10)).await.unwrap();
    assert_eq!(for_action.len(), 1);
    assert_eq!(for_action[0].event, EVENT_RUN_COMPLETED);
}
