//! Integration tests for the workflow aggregate store.
//!
//! Exercises load/persist round trips, locked mutations, cascades, backing
//! table filtering and deletion against a real database.

use assert_matches::assert_matches;
use serde_json::json;
use sqlx::PgPool;
use ontask_core::action::{Action, ActionColumnConditionTuple, ActionType};
use ontask_core::condition::Condition;
use ontask_core::error::CoreError;
use ontask_core::formula::{self, Formula, FormulaEvaluator, Operand, Operator, PredicateBuilder};
use ontask_core::frame::{FrameColumn, Record};
use ontask_core::value::{DataType, Value};
use ontask_core::view::View;
use ontask_core::workflow::Workflow;
use ontask_db::repositories::frame_repo::{table_name, FrameQuery};
use ontask_db::repositories::FrameRepo;
use ontask_db::store::{StoreError, WorkflowStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn records(value: serde_json::Value) -> Vec<Record> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_object().unwrap().clone())
        .collect()
}

fn score_at_least(n: i64) -> Formula {
    Formula::leaf("score", Operator::GreaterOrEqual, DataType::Integer, Operand::Single(Value::Integer(n)))
}

fn course() -> Workflow {
    let mut wf = Workflow::new(7, "course");
    wf.store_records(&records(json!([
        {"sid": 1, "name": "Ada", "score": 65, "when": "2024-03-01 09:00:00"},
        {"sid": 2, "name": "Bo", "score": 30, "when": "2024-03-02 09:00:00"},
        {"sid": 3, "name": "Cy", "score": 80, "when": null},
    ])))
    .unwrap();
    wf.set_attribute("course", "Biology 101").unwrap();

    let mut action = Action::new("feedback", ActionType::PersonalizedText);
    action.add_condition(Condition::new("passed", score_at_least(50))).unwrap();
    action
        .set_text_content("Hi {{ name }}{% if passed %}, well done{% endif %}")
        .unwrap();
    action.column_condition_tuples = vec![ActionColumnConditionTuple::new("name")];
    wf.add_action(action).unwrap();

    wf.add_view(View::new("passed", vec!["sid".into(), "name".into()], Some(score_at_least(50))))
        .unwrap();
    wf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_create_and_load_round_trip(pool: PgPool) {
    let original = course();
    let id = WorkflowStore::create(&pool, &original).await.unwrap();
    let loaded = WorkflowStore::load(&pool, id).await.unwrap();

    assert_eq!(loaded.id, Some(id));
    assert_eq!(loaded.owner_id, 7);
    assert_eq!(loaded.attributes.get("course").map(String::as_str), Some("Biology 101"));
    assert_eq!(loaded.columns(), original.columns());
    assert_eq!(loaded.frame(), original.frame());

    let action = loaded.action("feedback").unwrap();
    assert!(action.id.is_some());
    assert_eq!(action.text_content, original.action("feedback").unwrap().text_content);
    assert_eq!(action.conditions.len(), 1);
    assert_eq!(action.conditions[0].formula, score_at_least(50));
    assert_eq!(action.column_condition_tuples, vec![ActionColumnConditionTuple::new("name")]);

    let view = loaded.view("passed").unwrap();
    assert_eq!(view.filter, Some(score_at_least(50)));
    loaded.check_invariants().unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_mutation_persists_cascade(pool: PgPool) {
    let id = WorkflowStore::create(&pool, &course()).await.unwrap();

    let report = WorkflowStore::mutate(&pool, id, |wf| wf.delete_column("score"))
        .await
        .unwrap();
    assert_eq!(report.removed_conditions.len(), 1);

    let loaded = WorkflowStore::load(&pool, id).await.unwrap();
    assert!(loaded.column("score").is_err());
    assert!(loaded.action("feedback").unwrap().conditions.is_empty());
    assert!(loaded.view("passed").unwrap().filter.is_none());

    let (ncols,): (i32,) = sqlx::query_as("SELECT ncols FROM workflows WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(ncols, 3);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_failed_mutation_writes_nothing(pool: PgPool) {
    let id = WorkflowStore::create(&pool, &course()).await.unwrap();

    let result = WorkflowStore::mutate(&pool, id, |wf| {
        wf.set_attribute("course", "changed")?;
        wf.rename_column("name", "sid").map(|_| ())
    })
    .await;
    assert_matches!(result, Err(StoreError::Core(_)));

    let loaded = WorkflowStore::load(&pool, id).await.unwrap();
    assert_eq!(loaded.attributes.get("course").map(String::as_str), Some("Biology 101"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_action_ids_are_stable_across_mutations(pool: PgPool) {
    let id = WorkflowStore::create(&pool, &course()).await.unwrap();
    let before = WorkflowStore::load(&pool, id).await.unwrap().action("feedback").unwrap().id;

    WorkflowStore::mutate(&pool, id, |wf| {
        wf.set_text_content("feedback", "Hello {{ name }}").map(|_| ())
    })
    .await
    .unwrap();

    let loaded = WorkflowStore::load(&pool, id).await.unwrap();
    let action = loaded.action("feedback").unwrap();
    assert_eq!(action.id, before);
    assert_eq!(action.text_content, "Hello {{ name }}");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_sql_filter_agrees_with_row_evaluation(pool: PgPool) {
    let wf = course();
    let id = WorkflowStore::create(&pool, &wf).await.unwrap();

    let formulas = [
        score_at_least(50),
        score_at_least(50).negate(),
        Formula::leaf("score", Operator::IsNull, DataType::Integer, Operand::None),
        Formula::leaf("name", Operator::Contains, DataType::String, Operand::Single(Value::String("o".into()))),
        Formula::Or(vec![
            Formula::leaf("name", Operator::BeginsWith, DataType::String, Operand::Single(Value::String("a".into())))
                .negate(),
            score_at_least(80),
        ]),
    ];

    let typing = |name: &str| wf.frame().data_type(name);
    let columns: Vec<_> = wf.frame().columns().to_vec();
    let mut conn = pool.acquire().await.unwrap();
    for formula in formulas {
        let predicate = PredicateBuilder::new(&typing).evaluate(&formula).unwrap();
        let query = FrameQuery {
            filter: Some(&predicate),
            ..FrameQuery::default()
        };
        let from_sql = FrameRepo::select(&mut conn, id, &columns, &query, &wf.time_zone)
            .await
            .unwrap();
        let in_process = wf.frame().select(&formula::select_rows(wf.frame(), &formula).unwrap());
        assert_eq!(from_sql, in_process, "formula {}", formula.to_json());

        let count = FrameRepo::count(&mut conn, id, Some(&predicate)).await.unwrap();
        assert_eq!(count as usize, in_process.nrows());
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_search_is_case_insensitive(pool: PgPool) {
    let wf = course();
    let id = WorkflowStore::create(&pool, &wf).await.unwrap();
    let columns: Vec<_> = wf.frame().columns().to_vec();
    let search_columns = vec![FrameColumn::new("name", DataType::String)];

    let mut conn = pool.acquire().await.unwrap();
    let query = FrameQuery {
        search: Some(("ADA", &search_columns)),
        ..FrameQuery::default()
    };
    let found = FrameRepo::select(&mut conn, id, &columns, &query, &wf.time_zone)
        .await
        .unwrap();
    assert_eq!(found.nrows(), 1);
    assert_eq!(found.cell(0, "sid"), Some(&Some(Value::Integer(1))));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_search_matches_rendered_values(pool: PgPool) {
    let mut wf = Workflow::new(7, "grades");
    wf.store_records(&records(json!([
        {"sid": 1, "grade": 6.0, "ok": true, "when": "2024-03-01 09:00:00"},
        {"sid": 2, "grade": 7.5, "ok": false, "when": "2024-03-02 10:30:00"},
    ])))
    .unwrap();
    let id = WorkflowStore::create(&pool, &wf).await.unwrap();
    let columns: Vec<_> = wf.frame().columns().to_vec();
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

    let mut conn = pool.acquire().await.unwrap();
    for text in ["6.0", "7.5", "true", "fals", "09:00:00+00", "2024-03-02 10:30"] {
        let query = FrameQuery {
            search: Some((text, &columns)),
            ..FrameQuery::default()
        };
        let from_sql = FrameRepo::select(&mut conn, id, &columns, &query, &wf.time_zone)
            .await
            .unwrap();
        let in_process = wf.frame().search(text, &names, &wf.time_zone).unwrap();
        assert_eq!(from_sql.nrows(), 1, "search {text}");
        assert_eq!(from_sql, wf.frame().select(&in_process), "search {text}");
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_delete_drops_backing_table(pool: PgPool) {
    let id = WorkflowStore::create(&pool, &course()).await.unwrap();
    assert!(WorkflowStore::delete(&pool, id).await.unwrap());

    let (exists,): (bool,) = sqlx::query_as("SELECT to_regclass($1) IS NOT NULL")
        .bind(format!("\"{}\"", table_name(id)))
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!exists);
    assert_matches!(
        WorkflowStore::load(&pool, id).await,
        Err(StoreError::Core(CoreError::NotFound { .. }))
    );
    assert!(!WorkflowStore::delete(&pool, id).await.unwrap());
}
