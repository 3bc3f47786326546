//! Table upload, merge, query, row edits and CSV export.

mod common;

use axum::http::{header, StatusCode};
use common::{body_json, body_text, create_workflow, delete, get, post_json, put_json, score_at_least, seeded_workflow};
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test(migrations = "../../db/migrations")]
async fn upload_infers_columns_and_keys(pool: PgPool) {
    let id = create_workflow(&pool, "Upload").await;
    let app = common::build_test_app(pool);
    let response = put_json(
        app,
        &format!("/api/v1/workflows/{id}/table"),
        json!({"records": [
            {"sid": 1, "team": "red", "score": 7.5},
            {"sid": 2, "team": "red", "score": null},
        ]}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["nrows"], 2);
    assert_eq!(json["ncols"], 3);
    let columns = json["columns"].as_array().unwrap();
    assert_eq!(columns[0]["data_type"], "integer");
    assert_eq!(columns[0]["is_key"], true);
    assert_eq!(columns[1]["is_key"], false);
    assert_eq!(columns[2]["data_type"], "double");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn upload_without_unique_column_returns_400(pool: PgPool) {
    let id = create_workflow(&pool, "No key").await;
    let app = common::build_test_app(pool);
    let response = put_json(
        app,
        &format!("/api/v1/workflows/{id}/table"),
        json!({"records": [{"team": "red"}, {"team": "red"}]}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn query_filters_and_orders_in_the_database(pool: PgPool) {
    let id = seeded_workflow(&pool).await;
    let app = common::build_test_app(pool);
    let response = post_json(
        app,
        &format!("/api/v1/workflows/{id}/table/query"),
        json!({
            "columns": ["name", "score"],
            "filter": score_at_least(50),
            "order_by": "score",
            "ascending": false,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["filtered"], 2);
    let names: Vec<&str> = json["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Ana", "Cy"]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn query_search_matches_substring(pool: PgPool) {
    let id = seeded_workflow(&pool).await;
    let app = common::build_test_app(pool);
    let json = body_json(
        post_json(
            app,
            &format!("/api/v1/workflows/{id}/table/query"),
            json!({"search": "bo@", "search_columns": ["email"]}),
        )
        .await,
    )
    .await;

    let rows = json["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Bo");
    assert_eq!(json["filtered"], 4);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn query_on_unknown_column_returns_400(pool: PgPool) {
    let id = seeded_workflow(&pool).await;
    let app = common::build_test_app(pool);
    let response = post_json(
        app,
        &format!("/api/v1/workflows/{id}/table/query"),
        json!({"order_by": "missing"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn merge_adds_new_column(pool: PgPool) {
    let id = seeded_workflow(&pool).await;
    let app = common::build_test_app(pool.clone());
    let response = post_json(
        app,
        &format!("/api/v1/workflows/{id}/table/merge"),
        json!({
            "records": [
                {"sid": 1, "attendance": 10},
                {"sid": 3, "attendance": 8},
            ],
            "spec": {
                "how": "left",
                "left_on": "sid",
                "right_on": "sid",
            },
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let app = common::build_test_app(pool);
    let detail = body_json(get(app, &format!("/api/v1/workflows/{id}")).await).await;
    assert_eq!(detail["ncols"], 5);
    assert_eq!(detail["nrows"], 4);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn update_and_delete_row_by_key(pool: PgPool) {
    let id = seeded_workflow(&pool).await;

    let app = common::build_test_app(pool.clone());
    let response = put_json(
        app,
        &format!("/api/v1/workflows/{id}/table/rows?key=sid&value=2"),
        json!({"updates": {"score": 55}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let app = common::build_test_app(pool.clone());
    let json = body_json(
        post_json(
            app,
            &format!("/api/v1/workflows/{id}/table/query"),
            json!({"filter": score_at_least(50)}),
        )
        .await,
    )
    .await;
    assert_eq!(json["filtered"], 3);

    let app = common::build_test_app(pool.clone());
    let response = delete(app, &format!("/api/v1/workflows/{id}/table/rows?key=sid&value=4")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let app = common::build_test_app(pool);
    let detail = body_json(get(app, &format!("/api/v1/workflows/{id}")).await).await;
    assert_eq!(detail["nrows"], 3);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn update_row_with_unknown_key_returns_404(pool: PgPool) {
    let id = seeded_workflow(&pool).await;
    let app = common::build_test_app(pool);
    let response = put_json(
        app,
        &format!("/api/v1/workflows/{id}/table/rows?key=sid&value=99"),
        json!({"updates": {"score": 1}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn csv_export_sets_download_headers(pool: PgPool) {
    let id = seeded_workflow(&pool).await;
    let app = common::build_test_app(pool);
    let response = get(app, &format!("/api/v1/workflows/{id}/table/csv")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/csv; charset=utf-8"
    );
    assert!(response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("attachment"));

    let body = body_text(response).await;
    let mut lines = body.lines();
    assert_eq!(lines.next(), Some("sid,email,name,score"));
    assert_eq!(lines.count(), 4);
}
