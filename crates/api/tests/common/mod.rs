#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use ontask_api::auth::jwt::{generate_access_token, JwtConfig};
use ontask_api::config::ServerConfig;
use ontask_api::router::build_app_router;
use ontask_api::state::AppState;
use ontask_core::transport::CollectingTransport;
use ontask_core::types::{utc, DbId};
use ontask_events::EventBus;

/// Owner used by the request helpers unless a test picks another.
pub const TEST_USER: DbId = 1;

/// Test `ServerConfig` with a fixed signing secret and a UTC default zone.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: JwtConfig {
            secret: "test-secret-for-integration-tests".to_string(),
            access_token_expiry_mins: 15,
        },
        time_zone: utc(),
    }
}

/// The production router over `pool`, delivering into an in-memory
/// transport.
pub fn build_test_app(pool: PgPool) -> Router {
    build_test_app_with_transport(pool).0
}

/// Like [`build_test_app`], also returning the transport to inspect what
/// runs delivered.
pub fn build_test_app_with_transport(pool: PgPool) -> (Router, Arc<CollectingTransport>) {
    let config = test_config();
    let transport = Arc::new(CollectingTransport::new());
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        event_bus: Arc::new(EventBus::default()),
        transport: transport.clone(),
    };
    (build_app_router(state, &config), transport)
}

pub fn token_for(user_id: DbId) -> String {
    generate_access_token(user_id, "instructor", &test_config().jwt).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Send a request as `user_id`; `None` sends no Authorization header.
pub async fn send_as(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
    user_id: Option<DbId>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header("Authorization", format!("Bearer {}", token_for(user_id)));
    }
    let request = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send_as(app, Method::GET, uri, None, Some(TEST_USER)).await
}

pub async fn post_json(app: Router, uri: &str, json: serde_json::Value) -> Response<Body> {
    send_as(app, Method::POST, uri, Some(json), Some(TEST_USER)).await
}

pub async fn put_json(app: Router, uri: &str, json: serde_json::Value) -> Response<Body> {
    send_as(app, Method::PUT, uri, Some(json), Some(TEST_USER)).await
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    send_as(app, Method::DELETE, uri, None, Some(TEST_USER)).await
}

/// Create a workflow for [`TEST_USER`] and return its id.
pub async fn create_workflow(pool: &PgPool, name: &str) -> DbId {
    let response = post_json(
        build_test_app(pool.clone()),
        "/api/v1/workflows",
        serde_json::json!({ "name": name }),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    body_json(response).await["id"].as_i64().unwrap()
}

/// A workflow holding a four-student table keyed by `sid`.
pub async fn seeded_workflow(pool: &PgPool) -> DbId {
    let id = create_workflow(pool, "Course").await;
    let response = put_json(
        build_test_app(pool.clone()),
        &format!("/api/v1/workflows/{id}/table"),
        serde_json::json!({ "records": [
            { "sid": 1, "email": "ana@example.com", "name": "Ana", "score": 91 },
            { "sid": 2, "email": "bo@example.com", "name": "Bo", "score": 45 },
            { "sid": 3, "email": "cy@example.com", "name": "Cy", "score": 80 },
            { "sid": 4, "email": "di@example.com", "name": "Di", "score": 30 },
        ]}),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    id
}

/// QueryBuilder leaf `score >= value` over an integer column.
pub fn score_at_least(value: i64) -> serde_json::Value {
    serde_json::json!({
        "condition": "AND",
        "not": false,
        "rules": [{
            "id": "score",
            "field": "score",
            "type": "integer",
            "input": "number",
            "operator": "greater_or_equal",
            "value": value,
        }],
    })
}
