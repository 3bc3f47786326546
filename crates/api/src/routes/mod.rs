pub mod action;
pub mod health;
pub mod view;
pub mod workflow;

use axum::Router;

use crate::state::AppState;

/// Every `/api/v1` route.
///
/// ```text
/// /workflows                                   workflows, attributes, columns, table
/// /workflows/{workflow_id}/actions             actions, conditions, runs, surveys
/// /workflows/{workflow_id}/views               views
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest(
        "/workflows",
        workflow::router()
            .nest("/{workflow_id}/actions", action::router())
            .nest("/{workflow_id}/views", view::router()),
    )
}
